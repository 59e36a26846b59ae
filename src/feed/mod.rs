//! Ingestion loop: fetch → normalize → history → DQS → decision, once per
//! interval, publishing a complete replacement of the fixture set.

pub mod history;
pub mod normalizer;
pub mod provider;

pub use normalizer::{NormalizerClient, SecondaryClient};
pub use provider::{FixtureSource, SecondarySource};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bankroll::{BankrollManager, Mode};
use crate::config::{DqsConfig, LeagueTiers};
use crate::db::models::{DataQuality, FeedFixture, Fixture, SecondaryFixture, Snapshot};
use crate::engine::validator::normalize_name;
use crate::engine::{dqs, league, DecisionEngine, Verdict};
use crate::error::EngineError;

use history::HistoryBuffer;

/// Counters exposed to the presentation layer and the health monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthStats {
    pub last_fetch: Option<DateTime<Utc>>,
    /// Fixtures reported live by the last successful fetch.
    pub total_discovered: usize,
    pub total_fetches: u64,
    pub error_count: u64,
    /// Failed cycles since the last successful one.
    pub consecutive_errors: u32,
    /// Fixtures that fell back to list-level data because detail failed.
    pub detail_fallbacks: u64,
    pub no_bet_count: u64,
    pub dqs_above: usize,
    pub dqs_below: usize,
}

/// What one cycle produced; broadcast to push subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub timestamp: DateTime<Utc>,
    pub fixtures: usize,
    pub duration_ms: u64,
    pub dqs_above: usize,
    pub dqs_below: usize,
    pub bets: usize,
    pub passes: usize,
    pub no_bets: usize,
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Default)]
struct BoardInner {
    fixtures: Vec<Fixture>,
    secondary: Vec<SecondaryFixture>,
    stats: HealthStats,
    last_fetch_duration_ms: u64,
}

/// Current fixture set plus ingestion counters. Written only by the
/// ingestion loop; everything else reads.
#[derive(Clone)]
pub struct FixtureBoard {
    inner: Arc<RwLock<BoardInner>>,
    updates: broadcast::Sender<CycleSummary>,
}

impl Default for FixtureBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureBoard {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(64);
        FixtureBoard {
            inner: Arc::new(RwLock::new(BoardInner::default())),
            updates,
        }
    }

    pub async fn fixtures(&self) -> Vec<Fixture> {
        self.inner.read().await.fixtures.clone()
    }

    pub async fn fixture(&self, id: &str) -> Option<Fixture> {
        self.inner
            .read()
            .await
            .fixtures
            .iter()
            .find(|f| f.id() == id)
            .cloned()
    }

    pub async fn fixture_count(&self) -> usize {
        self.inner.read().await.fixtures.len()
    }

    pub async fn secondary_count(&self) -> usize {
        self.inner.read().await.secondary.len()
    }

    pub async fn stats(&self) -> HealthStats {
        self.inner.read().await.stats.clone()
    }

    pub async fn last_fetch_duration_ms(&self) -> u64 {
        self.inner.read().await.last_fetch_duration_ms
    }

    /// Mean DQS of the current fixtures, 0 when there are none.
    pub async fn avg_dqs(&self) -> f64 {
        let inner = self.inner.read().await;
        if inner.fixtures.is_empty() {
            return 0.0;
        }
        let sum: f64 = inner.fixtures.iter().map(|f| f.dqs).sum();
        ((sum / inner.fixtures.len() as f64) * 1000.0).round() / 1000.0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CycleSummary> {
        self.updates.subscribe()
    }

    async fn publish(
        &self,
        fixtures: Vec<Fixture>,
        secondary: Vec<SecondaryFixture>,
        duration_ms: u64,
        now: DateTime<Utc>,
        detail_fallbacks: u64,
    ) {
        let mut inner = self.inner.write().await;
        let dqs_above = fixtures
            .iter()
            .filter(|f| f.data_quality == DataQuality::Ok)
            .count();
        inner.stats.dqs_above = dqs_above;
        inner.stats.dqs_below = fixtures.len() - dqs_above;
        inner.stats.total_discovered = fixtures.len();
        inner.stats.total_fetches += 1;
        inner.stats.consecutive_errors = 0;
        inner.stats.detail_fallbacks += detail_fallbacks;
        inner.stats.last_fetch = Some(now);
        inner.last_fetch_duration_ms = duration_ms;
        inner.fixtures = fixtures;
        inner.secondary = secondary;
    }

    async fn record_error(&self, duration_ms: u64) -> u64 {
        let mut inner = self.inner.write().await;
        inner.stats.error_count += 1;
        inner.stats.consecutive_errors += 1;
        inner.last_fetch_duration_ms = duration_ms;
        inner.stats.error_count
    }

    async fn add_no_bets(&self, n: u64) {
        if n > 0 {
            self.inner.write().await.stats.no_bet_count += n;
        }
    }

    fn broadcast(&self, summary: CycleSummary) {
        // No subscribers is fine.
        let _ = self.updates.send(summary);
    }
}

/// Build the new fixture set from this cycle's feed, carrying each fixture's
/// history over from `previous`. Fixtures missing from `feed` are dropped.
pub fn normalize_fixtures(
    feed: Vec<FeedFixture>,
    previous: &[Fixture],
    dqs_cfg: &DqsConfig,
    tiers: &LeagueTiers,
    now: DateTime<Utc>,
) -> Vec<Fixture> {
    let prev: HashMap<&str, &Fixture> = previous.iter().map(|f| (f.id(), f)).collect();
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(feed.len());

    for mut item in feed {
        if item.id.is_empty() {
            item.id = derived_id(&item);
            debug!("Fixture without id, keyed as {}", item.id);
        }
        if !seen.insert(item.id.clone()) {
            debug!("Duplicate fixture {} in feed, keeping the first", item.id);
            continue;
        }
        let old = prev.get(item.id.as_str());
        if let Some(old) = old {
            if item.score.regressed_from(&old.feed.score) {
                warn!(
                    "Score for {} ({}) went backwards {} -> {}; marking partial",
                    item.id,
                    item.match_name(),
                    old.feed.score,
                    item.score
                );
                item.is_partial = true;
            }
        }

        let score = dqs::score(&item, dqs_cfg);
        let mut history = old.map(|f| f.history.clone()).unwrap_or_else(HistoryBuffer::new);
        history.push(Snapshot {
            timestamp: now,
            dqs: score,
            minute: item.minute.clone(),
            score: item.score,
            stats: item.stats.clone(),
            latency_ms: item.latency_ms,
        });
        let tier = league::classify(&item.league_name, tiers);

        out.push(Fixture {
            dqs: score,
            data_quality: dqs::quality_label(score, dqs_cfg),
            tier,
            history,
            feed: item,
        });
    }
    out
}

/// Stable key for an entry the upstream sent without an identity.
fn derived_id(item: &FeedFixture) -> String {
    format!(
        "{}-vs-{}",
        normalize_name(&item.home_team),
        normalize_name(&item.away_team)
    )
}

pub struct IngestionLoop {
    source: Arc<dyn FixtureSource>,
    secondary: Option<Arc<dyn SecondarySource>>,
    board: FixtureBoard,
    engine: Arc<DecisionEngine>,
    bankroll: Arc<BankrollManager>,
    dqs: DqsConfig,
    tiers: LeagueTiers,
    poll_interval: Duration,
    fetch_timeout: Duration,
    running: AtomicBool,
    /// Bumped on every start and stop; a polling task exits once it no
    /// longer owns the current generation.
    generation: AtomicU64,
    stop: Notify,
    /// Held for the duration of a scheduled cycle.
    cycle: Mutex<()>,
}

impl IngestionLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn FixtureSource>,
        secondary: Option<Arc<dyn SecondarySource>>,
        board: FixtureBoard,
        engine: Arc<DecisionEngine>,
        bankroll: Arc<BankrollManager>,
        dqs: DqsConfig,
        tiers: LeagueTiers,
        poll_interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        IngestionLoop {
            source,
            secondary,
            board,
            engine,
            bankroll,
            dqs,
            tiers,
            poll_interval,
            fetch_timeout,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            stop: Notify::new(),
            cycle: Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the polling task. Returns `None` if it is already running.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Ingestion loop already running");
            return None;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.run(generation).await }))
    }

    /// Ask the loop to exit; an in-flight cycle completes first.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Ingestion loop stopping");
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.stop.notify_waiters();
        }
    }

    fn owns(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run(&self, generation: u64) {
        info!(
            "Ingestion loop started (source={}, secondary={}, interval={:?})",
            self.source.name(),
            self.secondary.as_ref().map(|s| s.name()).unwrap_or("none"),
            self.poll_interval
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.stop.notified() => {}
            }
            if !self.owns(generation) {
                break;
            }
            // A task from an earlier start may still be finishing its cycle.
            let _cycle = self.cycle.lock().await;
            if !self.owns(generation) {
                break;
            }
            self.run_cycle().await;
        }
        info!("Ingestion loop stopped");
    }

    /// One complete cycle. Never fails: upstream errors are logged, counted
    /// and leave the previous fixture set in place.
    pub async fn run_cycle(&self) -> CycleSummary {
        let started = Instant::now();
        let now = Utc::now();
        self.bankroll.refresh_day();

        let list = match self.fetch_list().await {
            Ok(list) => list,
            Err(e) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let errors = self.board.record_error(duration_ms).await;
                warn!("Ingestion cycle failed ({} errors so far): {}", errors, e);
                let summary = CycleSummary {
                    timestamp: now,
                    fixtures: self.board.fixture_count().await,
                    duration_ms,
                    dqs_above: 0,
                    dqs_below: 0,
                    bets: 0,
                    passes: 0,
                    no_bets: 0,
                    mode: self.bankroll.mode(),
                    error: Some(e.to_string()),
                };
                self.board.broadcast(summary.clone());
                return summary;
            }
        };

        let (details, secondary) = tokio::join!(self.fetch_details(list), self.fetch_secondary());
        let (feed, fallbacks) = details;

        let previous = self.board.fixtures().await;
        let fixtures = normalize_fixtures(feed, &previous, &self.dqs, &self.tiers, now);
        let duration_ms = started.elapsed().as_millis() as u64;
        self.board
            .publish(fixtures.clone(), secondary.clone(), duration_ms, now, fallbacks)
            .await;

        let (mut bets, mut passes, mut no_bets) = (0, 0, 0);
        let mut new_no_bets = 0;
        for fixture in &fixtures {
            let signal = self
                .engine
                .evaluate(fixture, self.bankroll.mode(), &secondary, now);
            match signal.verdict {
                Verdict::Bet => bets += 1,
                Verdict::Pass => passes += 1,
                Verdict::NoBet => no_bets += 1,
            }
            let counted = self.bankroll.log_verdict(fixture.id(), signal.verdict);
            if counted && signal.verdict == Verdict::NoBet {
                new_no_bets += 1;
            }
        }
        self.board.add_no_bets(new_no_bets).await;

        let live: HashSet<&str> = fixtures.iter().map(|f| f.id()).collect();
        self.engine.retain_live(|id| live.contains(id));

        let summary = CycleSummary {
            timestamp: now,
            fixtures: fixtures.len(),
            duration_ms,
            dqs_above: fixtures.iter().filter(|f| f.dqs >= self.dqs.threshold).count(),
            dqs_below: fixtures.iter().filter(|f| f.dqs < self.dqs.threshold).count(),
            bets,
            passes,
            no_bets,
            mode: self.bankroll.mode(),
            error: None,
        };
        info!(
            "Cycle: {} fixtures in {}ms (dqs ok {} / low {}), BET {} PASS {} NO-BET {}, fallbacks {}",
            summary.fixtures,
            summary.duration_ms,
            summary.dqs_above,
            summary.dqs_below,
            bets,
            passes,
            no_bets,
            fallbacks
        );
        self.board.broadcast(summary.clone());
        summary
    }

    async fn fetch_list(&self) -> Result<Vec<FeedFixture>, EngineError> {
        let name = self.source.name().to_string();
        match tokio::time::timeout(self.fetch_timeout, self.source.fetch_live_fixtures()).await {
            Ok(Ok(list)) => Ok(list),
            Ok(Err(e)) => Err(EngineError::Fetch {
                source_name: name,
                message: format!("{:#}", e),
            }),
            Err(_) => Err(EngineError::FetchTimeout {
                source_name: name,
                after: self.fetch_timeout,
            }),
        }
    }

    /// Fetch detail for every fixture concurrently. A failed, timed-out or
    /// missing detail falls back to the list entry marked partial. Returns
    /// the fixtures and the number of fallbacks.
    async fn fetch_details(&self, list: Vec<FeedFixture>) -> (Vec<FeedFixture>, u64) {
        let futures = list.into_iter().map(|item| {
            let source = Arc::clone(&self.source);
            let timeout = self.fetch_timeout;
            async move {
                if item.id.is_empty() {
                    return (item, false);
                }
                let res = tokio::time::timeout(timeout, source.fetch_fixture_detail(&item.id)).await;
                match res {
                    Ok(Ok(Some(mut detail))) => {
                        if detail.id.is_empty() {
                            detail.id = item.id.clone();
                        }
                        (detail, false)
                    }
                    Ok(Ok(None)) => {
                        debug!("No detail for {}, using list data", item.id);
                        (partial(item), true)
                    }
                    Ok(Err(e)) => {
                        warn!("Detail fetch for {} failed, using list data: {:#}", item.id, e);
                        (partial(item), true)
                    }
                    Err(_) => {
                        warn!(
                            "Detail fetch for {} timed out after {:?}, using list data",
                            item.id, timeout
                        );
                        (partial(item), true)
                    }
                }
            }
        });
        let results = futures_util::future::join_all(futures).await;
        let fallbacks = results.iter().filter(|(_, fell_back)| *fell_back).count() as u64;
        (results.into_iter().map(|(f, _)| f).collect(), fallbacks)
    }

    async fn fetch_secondary(&self) -> Vec<SecondaryFixture> {
        let Some(source) = &self.secondary else {
            return Vec::new();
        };
        if !self.engine.toggles().secondary_validation {
            return Vec::new();
        }
        match tokio::time::timeout(self.fetch_timeout, source.fetch_fixtures()).await {
            Ok(Ok(list)) => list,
            Ok(Err(e)) => {
                warn!("Secondary source '{}' failed: {:#}", source.name(), e);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Secondary source '{}' timed out after {:?}",
                    source.name(),
                    self.fetch_timeout
                );
                Vec::new()
            }
        }
    }
}

fn partial(mut item: FeedFixture) -> FeedFixture {
    item.is_partial = true;
    item
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{BankrollConfig, DecisionConfig, ModuleToggles, RiskConfig};
    use crate::db::models::{Minute, Score, SidePair, Tier};
    use crate::db::MemoryStore;
    use crate::engine::discovery::DiscoveryTracker;
    use crate::engine::dqs::tests::feed;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub(crate) list: Mutex<Vec<FeedFixture>>,
        pub(crate) details: Mutex<HashMap<String, FeedFixture>>,
        pub(crate) fail_list: AtomicBool,
        fail_detail: Mutex<HashSet<String>>,
        slow_detail: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl FixtureSource for FakeSource {
        async fn fetch_live_fixtures(&self) -> anyhow::Result<Vec<FeedFixture>> {
            if self.fail_list.load(Ordering::SeqCst) {
                anyhow::bail!("upstream 503");
            }
            Ok(self.list.lock().unwrap().clone())
        }

        async fn fetch_fixture_detail(&self, id: &str) -> anyhow::Result<Option<FeedFixture>> {
            if self.slow_detail.lock().unwrap().contains(id) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.fail_detail.lock().unwrap().contains(id) {
                anyhow::bail!("detail 500");
            }
            Ok(self.details.lock().unwrap().get(id).cloned())
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    struct FakeSecondary(Vec<SecondaryFixture>);

    #[async_trait]
    impl SecondarySource for FakeSecondary {
        async fn fetch_fixtures(&self) -> anyhow::Result<Vec<SecondaryFixture>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fake-secondary"
        }
    }

    pub(crate) fn detailed(id: &str, league: &str) -> FeedFixture {
        let mut f = feed(id, league);
        f.stats.shots_on_target = SidePair::new(3, 1);
        f.stats.dangerous_attacks = SidePair::new(20, 12);
        f
    }

    pub(crate) fn build(
        source: Arc<FakeSource>,
        secondary: Option<Arc<dyn SecondarySource>>,
        toggles: ModuleToggles,
    ) -> (Arc<IngestionLoop>, FixtureBoard, Arc<DecisionEngine>, Arc<BankrollManager>) {
        let store = Arc::new(MemoryStore::default());
        let board = FixtureBoard::new();
        let engine = Arc::new(DecisionEngine::new(
            DecisionConfig::default(),
            RiskConfig::default(),
            toggles,
            DiscoveryTracker::load(store.clone()),
        ));
        let bankroll = Arc::new(BankrollManager::load(BankrollConfig::default(), store));
        let ingestion = Arc::new(IngestionLoop::new(
            source,
            secondary,
            board.clone(),
            engine.clone(),
            bankroll.clone(),
            DqsConfig::default(),
            LeagueTiers::default(),
            Duration::from_millis(20),
            Duration::from_millis(200),
        ));
        (ingestion, board, engine, bankroll)
    }

    #[tokio::test]
    async fn cycle_publishes_scored_fixtures_and_signals() {
        let source = Arc::new(FakeSource::default());
        *source.list.lock().unwrap() = vec![feed("1", "Premier League"), feed("2", "Eredivisie")];
        source
            .details
            .lock()
            .unwrap()
            .insert("1".into(), detailed("1", "Premier League"));
        source
            .details
            .lock()
            .unwrap()
            .insert("2".into(), detailed("2", "Eredivisie"));
        let (ingestion, board, engine, bankroll) = build(source, None, ModuleToggles::default());

        let summary = ingestion.run_cycle().await;
        assert_eq!(summary.fixtures, 2);
        assert_eq!(summary.bets, 2);
        assert!(summary.error.is_none());

        let f = board.fixture("1").await.unwrap();
        assert_eq!(f.tier, Tier::Top);
        assert!((f.dqs - 1.0).abs() < 1e-9);
        assert_eq!(f.history.len(), 1);
        assert_eq!(board.fixture("2").await.unwrap().tier, Tier::Second);

        let stats = board.stats().await;
        assert_eq!(stats.total_fetches, 1);
        assert_eq!(stats.total_discovered, 2);
        assert_eq!(stats.dqs_above, 2);
        assert!(stats.last_fetch.is_some());

        assert_eq!(engine.latest_signal("1").unwrap().verdict, Verdict::Bet);
        assert_eq!(bankroll.snapshot().stats.bet_count, 2);

        // repeated unchanged verdicts are counted once per day
        ingestion.run_cycle().await;
        assert_eq!(bankroll.snapshot().stats.bet_count, 2);
        assert_eq!(board.fixture("1").await.unwrap().history.len(), 2);
    }

    #[tokio::test]
    async fn failed_detail_falls_back_to_partial_list_entry() {
        let source = Arc::new(FakeSource::default());
        *source.list.lock().unwrap() = vec![feed("1", "Premier League"), feed("2", "Premier League")];
        source
            .details
            .lock()
            .unwrap()
            .insert("1".into(), detailed("1", "Premier League"));
        source.fail_detail.lock().unwrap().insert("1".into());
        source.slow_detail.lock().unwrap().insert("2".into());
        let (ingestion, board, _, _) = build(source, None, ModuleToggles::default());

        let summary = ingestion.run_cycle().await;
        assert_eq!(summary.fixtures, 2);
        let f1 = board.fixture("1").await.unwrap();
        assert!(f1.feed.is_partial);
        // list entry alone scores 0.60, the partial flag takes it to 0.50
        let mut unflagged = f1.feed.clone();
        unflagged.is_partial = false;
        approx::assert_relative_eq!(dqs::score(&unflagged, &DqsConfig::default()), 0.6);
        approx::assert_relative_eq!(f1.dqs, 0.5);
        assert!(board.fixture("2").await.unwrap().feed.is_partial);
        assert_eq!(board.stats().await.detail_fallbacks, 2);
        assert_eq!(board.stats().await.error_count, 0);
    }

    #[tokio::test]
    async fn list_failure_keeps_previous_set_and_counts_error() {
        let source = Arc::new(FakeSource::default());
        *source.list.lock().unwrap() = vec![feed("1", "Premier League")];
        let (ingestion, board, _, _) = build(source.clone(), None, ModuleToggles::default());
        ingestion.run_cycle().await;

        source.fail_list.store(true, Ordering::SeqCst);
        let summary = ingestion.run_cycle().await;
        assert!(summary.error.unwrap().contains("upstream 503"));
        assert_eq!(board.fixture_count().await, 1);
        let stats = board.stats().await;
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.consecutive_errors, 1);
        assert_eq!(stats.total_fetches, 1);

        source.fail_list.store(false, Ordering::SeqCst);
        ingestion.run_cycle().await;
        assert_eq!(board.stats().await.consecutive_errors, 0);
    }

    #[tokio::test]
    async fn finished_fixtures_are_dropped_with_their_signals() {
        let source = Arc::new(FakeSource::default());
        *source.list.lock().unwrap() = vec![feed("1", "Premier League"), feed("2", "Premier League")];
        let (ingestion, board, engine, _) = build(source.clone(), None, ModuleToggles::default());
        ingestion.run_cycle().await;
        assert_eq!(engine.latest_signals().len(), 2);

        *source.list.lock().unwrap() = vec![feed("2", "Premier League")];
        ingestion.run_cycle().await;
        assert!(board.fixture("1").await.is_none());
        assert!(engine.latest_signal("1").is_none());
        assert_eq!(engine.latest_signals().len(), 1);
    }

    #[tokio::test]
    async fn secondary_mismatch_counts_no_bet() {
        let source = Arc::new(FakeSource::default());
        let mut primary = feed("1", "Premier League");
        primary.score = Score::new(1, 0);
        *source.list.lock().unwrap() = vec![primary.clone()];
        let secondary: Arc<dyn SecondarySource> = Arc::new(FakeSecondary(vec![SecondaryFixture {
            home_team: primary.home_team.clone(),
            away_team: primary.away_team.clone(),
            league_name: None,
            kickoff: None,
            score: Score::new(0, 0),
            minute: Minute::Elapsed(40),
        }]));
        let toggles = ModuleToggles {
            secondary_validation: true,
            ..ModuleToggles::default()
        };
        let (ingestion, board, _, bankroll) = build(source, Some(secondary), toggles);

        let summary = ingestion.run_cycle().await;
        assert_eq!(summary.no_bets, 1);
        assert_eq!(board.stats().await.no_bet_count, 1);
        assert_eq!(board.secondary_count().await, 1);
        assert_eq!(bankroll.snapshot().stats.no_bet_count, 1);
    }

    #[test]
    fn score_regression_marks_partial() {
        let now = Utc::now();
        let mut first = feed("1", "Premier League");
        first.score = Score::new(2, 0);
        let prev = normalize_fixtures(
            vec![first],
            &[],
            &DqsConfig::default(),
            &LeagueTiers::default(),
            now,
        );
        assert!(!prev[0].feed.is_partial);

        let mut second = feed("1", "Premier League");
        second.score = Score::new(1, 0);
        let next = normalize_fixtures(
            vec![second.clone(), second],
            &prev,
            &DqsConfig::default(),
            &LeagueTiers::default(),
            now,
        );
        assert_eq!(next.len(), 1);
        assert!(next[0].feed.is_partial);
        assert_eq!(next[0].history.len(), 2);
        assert_eq!(next[0].history.latest().unwrap().dqs, next[0].dqs);
    }

    #[tokio::test]
    async fn entries_without_id_are_kept_under_a_derived_key() {
        let source = Arc::new(FakeSource::default());
        let mut anonymous = feed("", "Eredivisie");
        anonymous.home_team = "Ajax".into();
        anonymous.away_team = "PSV".into();
        *source.list.lock().unwrap() = vec![feed("1", "Premier League"), anonymous];
        let (ingestion, board, _, _) = build(source, None, ModuleToggles::default());

        let summary = ingestion.run_cycle().await;
        assert_eq!(summary.fixtures, 2);
        assert!(summary.error.is_none());
        ingestion.run_cycle().await;
        let f = board.fixture("ajax-vs-psv").await.unwrap();
        // list data only, but still tracked across cycles
        assert_eq!(f.history.len(), 2);
        assert_eq!(board.stats().await.detail_fallbacks, 2);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_ends_the_loop() {
        let source = Arc::new(FakeSource::default());
        *source.list.lock().unwrap() = vec![feed("1", "Premier League")];
        let (ingestion, board, _, _) = build(source, None, ModuleToggles::default());
        let mut updates = board.subscribe();

        let handle = ingestion.start().expect("first start spawns");
        assert!(ingestion.start().is_none());
        assert!(ingestion.is_running());

        let summary = tokio::time::timeout(Duration::from_secs(2), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.fixtures, 1);

        ingestion.stop();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!ingestion.is_running());
    }

    #[tokio::test]
    async fn restart_right_after_stop_keeps_a_single_loop() {
        let source = Arc::new(FakeSource::default());
        *source.list.lock().unwrap() = vec![feed("1", "Premier League")];
        let (ingestion, board, _, _) = build(source, None, ModuleToggles::default());
        let mut updates = board.subscribe();

        let first = ingestion.start().expect("first start spawns");
        tokio::time::timeout(Duration::from_secs(2), updates.recv())
            .await
            .unwrap()
            .unwrap();

        ingestion.stop();
        let _second = ingestion.start().expect("restart spawns");
        // the old task exits on its own instead of running alongside
        tokio::time::timeout(Duration::from_secs(2), first)
            .await
            .unwrap()
            .unwrap();
        assert!(ingestion.is_running());

        let mut updates = board.subscribe();
        let mut cycles = 0;
        let window = tokio::time::sleep(Duration::from_millis(400));
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                msg = updates.recv() => {
                    if msg.is_ok() {
                        cycles += 1;
                    }
                }
            }
        }
        // one loop at a 20 ms interval yields about 20 cycles in 400 ms
        assert!(cycles > 0 && cycles <= 28, "{} cycles in 400ms", cycles);
        ingestion.stop();
    }
}
