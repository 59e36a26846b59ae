//! Pull API and push channel for the presentation layer.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::bankroll::{BankrollManager, BankrollState, Mode};
use crate::config::ModuleToggles;
use crate::engine::{DecisionEngine, Verdict};
use crate::error::EngineError;
use crate::feed::{FixtureBoard, HealthStats};
use crate::health::{engine_status, EngineStatus, HealthMonitor};

const DEFAULT_LEDGER_LIMIT: usize = 50;

pub struct AppState {
    pub board: FixtureBoard,
    pub engine: Arc<DecisionEngine>,
    pub bankroll: Arc<BankrollManager>,
    pub health: Arc<HealthMonitor>,
    /// Used to decide when the last fetch is stale.
    pub poll_interval: Duration,
}

/// Build the Axum router for the pull API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/fixtures", get(fixtures_handler))
        .route("/api/fixtures/:id", get(fixture_handler))
        .route("/api/fixtures/:id/signal", get(fixture_signal_handler))
        .route("/api/signals", get(signals_handler))
        .route("/api/decision-log", get(decision_log_handler))
        .route("/api/bankroll", get(bankroll_handler))
        .route("/api/bankroll/analytics", get(analytics_handler))
        .route("/api/bankroll/ledger", get(ledger_handler))
        .route("/api/bankroll/reset", post(reset_handler))
        .route("/api/bets", post(bet_handler))
        .route("/api/results", post(result_handler))
        .route("/api/health", get(health_handler))
        .route("/api/health/report", get(health_report_handler))
        .route("/api/discovery", get(discovery_handler))
        .route("/api/modules", put(modules_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

fn not_found(what: &str, id: &str) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("{} {} not found", what, id))
}

/// GET /api/fixtures
async fn fixtures_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.board.fixtures().await)
}

/// GET /api/fixtures/:id
async fn fixture_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .board
        .fixture(&id)
        .await
        .map(Json)
        .ok_or_else(|| not_found("fixture", &id))
}

/// GET /api/fixtures/:id/signal
async fn fixture_signal_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .engine
        .latest_signal(&id)
        .map(Json)
        .ok_or_else(|| not_found("signal for fixture", &id))
}

/// GET /api/signals
async fn signals_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.latest_signals())
}

/// GET /api/decision-log
async fn decision_log_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.decision_log())
}

/// GET /api/bankroll
async fn bankroll_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Rolls the day over first, so a stale NO_BET from yesterday is not shown.
    state.bankroll.refresh_day();
    Json(state.bankroll.snapshot())
}

/// GET /api/bankroll/analytics
async fn analytics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.bankroll.analytics())
}

#[derive(Debug, Deserialize)]
struct LedgerQuery {
    limit: Option<usize>,
}

/// GET /api/bankroll/ledger?limit=50
async fn ledger_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LedgerQuery>,
) -> impl IntoResponse {
    Json(state.bankroll.ledger(q.limit.unwrap_or(DEFAULT_LEDGER_LIMIT)))
}

/// POST /api/bankroll/reset
async fn reset_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.bankroll.reset())
}

#[derive(Debug, Deserialize)]
struct BetRequest {
    fixture_id: String,
    /// Overrides the recommended stake.
    stake: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BetResponse {
    fixture_id: String,
    stake: f64,
    balance: f64,
    mode: Mode,
}

/// POST /api/bets
///
/// Stakes the recommended (or given) amount on a fixture whose latest signal
/// is BET.
async fn bet_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BetRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let fixture = state
        .board
        .fixture(&req.fixture_id)
        .await
        .ok_or_else(|| not_found("fixture", &req.fixture_id))?;
    let signal = state
        .engine
        .latest_signal(&req.fixture_id)
        .ok_or_else(|| not_found("signal for fixture", &req.fixture_id))?;
    if signal.verdict != Verdict::Bet {
        return Err((
            StatusCode::CONFLICT,
            format!("latest verdict is {}: {}", signal.verdict.as_str(), signal.reason),
        ));
    }

    let stake = req
        .stake
        .unwrap_or_else(|| state.bankroll.calculate_recommended_stake(&fixture, &signal));
    if !state.bankroll.approve_bet(&fixture, &signal, stake) {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("bet of {:.2} on {} rejected", stake, req.fixture_id),
        ));
    }
    let bankroll = state.bankroll.snapshot();
    Ok(Json(BetResponse {
        fixture_id: req.fixture_id,
        stake,
        balance: bankroll.current_balance,
        mode: bankroll.current_mode,
    }))
}

#[derive(Debug, Deserialize)]
struct ResultRequest {
    match_id: String,
    is_win: bool,
    stake: f64,
    odds: f64,
}

/// POST /api/results
async fn result_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResultRequest>,
) -> Result<Json<BankrollState>, (StatusCode, String)> {
    state
        .bankroll
        .process_result(&req.match_id, req.is_win, req.stake, req.odds)
        .map(Json)
        .map_err(|e| match e {
            EngineError::InvalidBet(_) => (StatusCode::BAD_REQUEST, e.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        })
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: EngineStatus,
    mode: Mode,
    fixtures: usize,
    secondary_fixtures: usize,
    avg_dqs: f64,
    last_fetch_duration_ms: u64,
    stats: HealthStats,
}

/// GET /api/health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.board.stats().await;
    let fixtures = state.board.fixture_count().await;
    let mode = state.bankroll.mode();
    Json(HealthResponse {
        status: engine_status(&stats, fixtures, mode, state.poll_interval, Utc::now()),
        mode,
        fixtures,
        secondary_fixtures: state.board.secondary_count().await,
        avg_dqs: state.board.avg_dqs().await,
        last_fetch_duration_ms: state.board.last_fetch_duration_ms().await,
        stats,
    })
}

/// GET /api/health/report – `null` until two snapshots exist.
async fn health_report_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health.report())
}

/// GET /api/discovery
async fn discovery_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.discovery().snapshot())
}

#[derive(Debug, Default, Deserialize)]
struct ModulesUpdate {
    xg: Option<bool>,
    bayesian: Option<bool>,
    league_profiles: Option<bool>,
    secondary_validation: Option<bool>,
}

/// PUT /api/modules – flips only the toggles present in the body.
async fn modules_handler(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ModulesUpdate>,
) -> Json<ModuleToggles> {
    let mut toggles = state.engine.toggles();
    toggles.xg = update.xg.unwrap_or(toggles.xg);
    toggles.bayesian = update.bayesian.unwrap_or(toggles.bayesian);
    toggles.league_profiles = update.league_profiles.unwrap_or(toggles.league_profiles);
    toggles.secondary_validation = update
        .secondary_validation
        .unwrap_or(toggles.secondary_validation);
    state.engine.set_toggles(toggles);
    Json(toggles)
}

/// GET /ws – pushes each cycle summary as JSON text.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let board = state.board.clone();
    ws.on_upgrade(move |socket| push_cycles(socket, board))
}

async fn push_cycles(mut socket: WebSocket, board: FixtureBoard) {
    let mut rx = board.subscribe();
    info!("Push client connected");
    loop {
        let summary = match rx.recv().await {
            Ok(s) => s,
            Err(RecvError::Lagged(n)) => {
                debug!("Push client lagged, skipped {} cycle summaries", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let text = match serde_json::to_string(&summary) {
            Ok(t) => t,
            Err(e) => {
                debug!("Failed to encode cycle summary: {}", e);
                continue;
            }
        };
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    info!("Push client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::tests::{build, detailed, FakeSource};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<BankrollManager>) {
        let source = Arc::new(FakeSource::default());
        *source.list.lock().unwrap() = vec![detailed("1", "Premier League")];
        source
            .details
            .lock()
            .unwrap()
            .insert("1".into(), detailed("1", "Premier League"));
        let (ingestion, board, engine, bankroll) = build(source, None, ModuleToggles::default());
        ingestion.run_cycle().await;
        let state = AppState {
            board,
            engine,
            bankroll: bankroll.clone(),
            health: Arc::new(HealthMonitor::new(Utc::now())),
            poll_interval: Duration::from_secs(10),
        };
        (router(state), bankroll)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    async fn send_json(
        app: Router,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn fixtures_and_signals_are_served() {
        let (app, _) = app().await;
        let (status, json) = get_json(app.clone(), "/api/fixtures").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["id"], "1");

        let (status, json) = get_json(app.clone(), "/api/fixtures/1/signal").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["verdict"], "BET");

        let (status, _) = get_json(app.clone(), "/api/fixtures/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, json) = get_json(app, "/api/decision-log").await;
        assert_eq!(json.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bet_then_settle_moves_the_balance() {
        let (app, bankroll) = app().await;
        let (status, json) =
            send_json(app.clone(), "POST", "/api/bets", serde_json::json!({ "fixture_id": "1" })).await;
        assert_eq!(status, StatusCode::OK);
        // 1% of 2000 for a tier-1 league
        assert_eq!(json["stake"].as_f64().unwrap(), 20.0);
        assert_eq!(json["balance"].as_f64().unwrap(), 1980.0);

        let (status, json) = send_json(
            app.clone(),
            "POST",
            "/api/results",
            serde_json::json!({ "match_id": "1", "is_win": true, "stake": 20.0, "odds": 2.0 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["current_balance"].as_f64().unwrap(), 2020.0);
        assert_eq!(bankroll.ledger(10).len(), 3);

        let (status, json) = get_json(app, "/api/bankroll/ledger?limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["type"], "BET_WIN");
    }

    #[tokio::test]
    async fn invalid_settlement_is_a_bad_request() {
        let (app, _) = app().await;
        let (status, _) = send_json(
            app,
            "POST",
            "/api/results",
            serde_json::json!({ "match_id": "1", "is_win": true, "stake": 20.0, "odds": 0.5 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn module_toggles_are_patched() {
        let (app, _) = app().await;
        let (status, json) =
            send_json(app, "PUT", "/api/modules", serde_json::json!({ "xg": true })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["xg"], true);
        assert_eq!(json["bayesian"], false);
    }

    #[tokio::test]
    async fn health_reports_live_status() {
        let (app, _) = app().await;
        let (status, json) = get_json(app.clone(), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "LIVE");
        assert_eq!(json["stats"]["total_fetches"], 1);

        let (status, json) = get_json(app, "/api/health/report").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.is_null());
    }
}
