use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

mod bankroll;
mod config;
mod dashboard;
mod db;
mod engine;
mod error;
mod feed;
mod health;

use bankroll::BankrollManager;
use config::Config;
use dashboard::AppState;
use db::{Database, StateStore};
use engine::discovery::DiscoveryTracker;
use engine::DecisionEngine;
use feed::{FixtureBoard, FixtureSource, IngestionLoop, NormalizerClient, SecondaryClient, SecondarySource};
use health::{start_health_monitor, HealthMonitor};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;
    info!(
        "Decision mode {:?}, DQS threshold {:.2}, polling every {}s",
        config.decision_mode, config.dqs_threshold, config.poll_interval_secs
    );

    let store: Arc<dyn StateStore> = Arc::new(Database::open(&config.database_path)?);
    info!("Database opened: {}", config.database_path);

    let discovery = DiscoveryTracker::load(store.clone());
    let engine = Arc::new(DecisionEngine::new(
        config.decision(),
        config.risk(),
        config.modules(),
        discovery,
    ));
    let bankroll = Arc::new(BankrollManager::load(config.bankroll(), store));
    let state = bankroll.snapshot();
    info!(
        "Bankroll: balance {:.2}, mode {}",
        state.current_balance, state.current_mode
    );

    let source: Arc<dyn FixtureSource> = Arc::new(NormalizerClient::new(
        &config.normalizer_url,
        config.fetch_timeout(),
    )?);
    let secondary: Option<Arc<dyn SecondarySource>> = match &config.secondary_url {
        Some(url) => {
            info!("Secondary validation source: {}", url);
            Some(Arc::new(SecondaryClient::new(url, config.fetch_timeout())?))
        }
        None => None,
    };

    let board = FixtureBoard::new();
    let ingestion = Arc::new(IngestionLoop::new(
        source,
        secondary,
        board.clone(),
        engine.clone(),
        bankroll.clone(),
        config.dqs(),
        config.league_tiers(),
        config.poll_interval(),
        config.fetch_timeout(),
    ));
    ingestion.start();

    let health = Arc::new(HealthMonitor::new(Utc::now()));
    start_health_monitor(
        health.clone(),
        board.clone(),
        engine.clone(),
        config.health_interval(),
    );

    let app = dashboard::router(AppState {
        board,
        engine,
        bankroll,
        health,
        poll_interval: config.poll_interval(),
    });
    let addr: SocketAddr = config
        .api_addr
        .parse()
        .with_context(|| format!("invalid API address {}", config.api_addr))?;
    info!("Pull API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run the API server (blocks until shutdown)
    axum::serve(listener, app).await?;

    ingestion.stop();
    Ok(())
}
