//! Periodic engine vitals for leak and stability detection. Read-only: it
//! never mutates anything it observes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bankroll::Mode;
use crate::engine::DecisionEngine;
use crate::feed::{FixtureBoard, HealthStats};

/// 48 hours at a 5-minute cadence.
pub const SNAPSHOT_CAPACITY: usize = 576;

const LEAK_LOG_GROWTH: i64 = 1000;
const LEAK_FIXTURE_GROWTH: i64 = 100;
const STABILITY_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryCounts {
    pub fixtures: usize,
    /// Decision log entries.
    pub logs: usize,
    /// Secondary validator observations.
    pub secondary: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: i64,
    pub memory: MemoryCounts,
    pub health: HealthStats,
    pub last_fetch_duration_ms: u64,
    pub avg_dqs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stability {
    Stable,
    Degraded,
    Unstable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryGrowth {
    pub fixtures: i64,
    pub logs: i64,
    pub secondary: i64,
    pub potential_leak: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub uptime_secs: i64,
    pub uptime_hours: f64,
    pub snapshots: usize,
    pub memory_growth: MemoryGrowth,
    pub error_growth: i64,
    pub no_bet_growth: i64,
    pub total_fetches: u64,
    pub avg_dqs: f64,
    pub last_fetch_duration_ms: u64,
    pub stability: Stability,
}

/// Coarse engine state shown to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineStatus {
    /// No successful fetch yet.
    Idle,
    /// Last cycle failed or the last fetch is stale.
    Degraded,
    /// Bankroll in NO_BET mode.
    CapitalGate,
    NoLiveMatches,
    Live,
}

/// Classify the engine from its counters. A fetch older than three poll
/// intervals counts as stale.
pub fn engine_status(
    stats: &HealthStats,
    fixtures: usize,
    mode: Mode,
    poll_interval: Duration,
    now: DateTime<Utc>,
) -> EngineStatus {
    let Some(last_fetch) = stats.last_fetch else {
        return if stats.error_count > 0 {
            EngineStatus::Degraded
        } else {
            EngineStatus::Idle
        };
    };
    let stale_after = chrono::Duration::from_std(poll_interval * 3)
        .unwrap_or_else(|_| chrono::Duration::minutes(5));
    if stats.consecutive_errors > 0 || now - last_fetch > stale_after {
        EngineStatus::Degraded
    } else if mode == Mode::NoBet {
        EngineStatus::CapitalGate
    } else if fixtures == 0 {
        EngineStatus::NoLiveMatches
    } else {
        EngineStatus::Live
    }
}

pub struct HealthMonitor {
    started: DateTime<Utc>,
    snapshots: Mutex<VecDeque<HealthSnapshot>>,
}

impl HealthMonitor {
    pub fn new(started: DateTime<Utc>) -> Self {
        HealthMonitor {
            started,
            snapshots: Mutex::new(VecDeque::with_capacity(SNAPSHOT_CAPACITY)),
        }
    }

    pub async fn capture(
        &self,
        board: &FixtureBoard,
        engine: &DecisionEngine,
        now: DateTime<Utc>,
    ) -> HealthSnapshot {
        let snapshot = HealthSnapshot {
            timestamp: now,
            uptime_secs: (now - self.started).num_seconds(),
            memory: MemoryCounts {
                fixtures: board.fixture_count().await,
                logs: engine.decision_log_len(),
                secondary: engine.secondary_log_len(),
            },
            health: board.stats().await,
            last_fetch_duration_ms: board.last_fetch_duration_ms().await,
            avg_dqs: board.avg_dqs().await,
        };
        self.record(snapshot.clone());
        snapshot
    }

    pub fn record(&self, snapshot: HealthSnapshot) {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots.push_back(snapshot);
        while snapshots.len() > SNAPSHOT_CAPACITY {
            snapshots.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compare the oldest and newest snapshots. `None` until two exist.
    pub fn report(&self) -> Option<HealthReport> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        if snapshots.len() < 2 {
            return None;
        }
        let first = snapshots.front()?;
        let last = snapshots.back()?;

        let growth = |a: usize, b: usize| b as i64 - a as i64;
        let fixtures = growth(first.memory.fixtures, last.memory.fixtures);
        let logs = growth(first.memory.logs, last.memory.logs);

        Some(HealthReport {
            uptime_secs: last.uptime_secs,
            uptime_hours: (last.uptime_secs as f64 / 3600.0 * 100.0).round() / 100.0,
            snapshots: snapshots.len(),
            memory_growth: MemoryGrowth {
                fixtures,
                logs,
                secondary: growth(first.memory.secondary, last.memory.secondary),
                potential_leak: logs > LEAK_LOG_GROWTH || fixtures > LEAK_FIXTURE_GROWTH,
            },
            error_growth: last.health.error_count as i64 - first.health.error_count as i64,
            no_bet_growth: last.health.no_bet_count as i64 - first.health.no_bet_count as i64,
            total_fetches: last.health.total_fetches,
            avg_dqs: last.avg_dqs,
            last_fetch_duration_ms: last.last_fetch_duration_ms,
            stability: stability(&snapshots),
        })
    }
}

/// Error-count growth over the last ten snapshots: > 10 unstable, > 5
/// degraded.
fn stability(snapshots: &VecDeque<HealthSnapshot>) -> Stability {
    if snapshots.len() < STABILITY_WINDOW {
        return Stability::InsufficientData;
    }
    let recent = snapshots.iter().skip(snapshots.len() - STABILITY_WINDOW);
    let counts: Vec<u64> = recent.map(|s| s.health.error_count).collect();
    let growth = counts[counts.len() - 1] as i64 - counts[0] as i64;
    if growth > 10 {
        Stability::Unstable
    } else if growth > 5 {
        Stability::Degraded
    } else {
        Stability::Stable
    }
}

/// Spawn the periodic sampler.
pub fn start_health_monitor(
    monitor: Arc<HealthMonitor>,
    board: FixtureBoard,
    engine: Arc<DecisionEngine>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Health monitor started (interval={:?})", every);
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the first sample has
        // a full interval behind it.
        interval.tick().await;
        loop {
            interval.tick().await;
            let s = monitor.capture(&board, &engine, Utc::now()).await;
            info!(
                "Health: uptime {}s, fixtures {}, logs {}, secondary {}, errors {}, avg dqs {:.3}, last fetch {}ms",
                s.uptime_secs,
                s.memory.fixtures,
                s.memory.logs,
                s.memory.secondary,
                s.health.error_count,
                s.avg_dqs,
                s.last_fetch_duration_ms
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 28, 12, 0, 0).unwrap()
    }

    fn snap(i: i64, fixtures: usize, logs: usize, errors: u64) -> HealthSnapshot {
        HealthSnapshot {
            timestamp: t0() + chrono::Duration::minutes(5 * i),
            uptime_secs: 300 * i,
            memory: MemoryCounts {
                fixtures,
                logs,
                secondary: 0,
            },
            health: HealthStats {
                error_count: errors,
                total_fetches: 30 * i as u64,
                ..HealthStats::default()
            },
            last_fetch_duration_ms: 120,
            avg_dqs: 0.82,
        }
    }

    #[test]
    fn report_needs_two_snapshots() {
        let m = HealthMonitor::new(t0());
        assert!(m.report().is_none());
        m.record(snap(0, 5, 10, 0));
        assert!(m.report().is_none());
        m.record(snap(1, 6, 20, 1));
        let r = m.report().unwrap();
        assert_eq!(r.memory_growth.fixtures, 1);
        assert_eq!(r.memory_growth.logs, 10);
        assert!(!r.memory_growth.potential_leak);
        assert_eq!(r.error_growth, 1);
        assert_eq!(r.stability, Stability::InsufficientData);
    }

    #[test]
    fn large_growth_flags_potential_leak() {
        let m = HealthMonitor::new(t0());
        m.record(snap(0, 5, 10, 0));
        m.record(snap(1, 106, 10, 0));
        assert!(m.report().unwrap().memory_growth.potential_leak);
    }

    #[test]
    fn stability_from_recent_error_growth() {
        let m = HealthMonitor::new(t0());
        for i in 0..10 {
            m.record(snap(i, 5, 10, 0));
        }
        assert_eq!(m.report().unwrap().stability, Stability::Stable);

        let m = HealthMonitor::new(t0());
        for i in 0..10 {
            m.record(snap(i, 5, 10, i as u64));
        }
        // 9 errors across the window
        assert_eq!(m.report().unwrap().stability, Stability::Degraded);

        let m = HealthMonitor::new(t0());
        for i in 0..12 {
            m.record(snap(i, 5, 10, 2 * i as u64));
        }
        assert_eq!(m.report().unwrap().stability, Stability::Unstable);
    }

    #[test]
    fn snapshots_are_capped() {
        let m = HealthMonitor::new(t0());
        for i in 0..(SNAPSHOT_CAPACITY as i64 + 4) {
            m.record(snap(i, 1, 1, 0));
        }
        assert_eq!(m.len(), SNAPSHOT_CAPACITY);
        assert_eq!(m.report().unwrap().uptime_secs, 300 * (SNAPSHOT_CAPACITY as i64 + 3));
    }

    #[test]
    fn status_distinguishes_idle_degraded_gate_and_empty() {
        let poll = Duration::from_secs(10);
        let now = t0();
        let mut stats = HealthStats::default();
        assert_eq!(engine_status(&stats, 0, Mode::Normal, poll, now), EngineStatus::Idle);

        stats.last_fetch = Some(now - chrono::Duration::seconds(5));
        assert_eq!(
            engine_status(&stats, 0, Mode::Normal, poll, now),
            EngineStatus::NoLiveMatches
        );
        assert_eq!(engine_status(&stats, 3, Mode::Normal, poll, now), EngineStatus::Live);
        assert_eq!(
            engine_status(&stats, 3, Mode::NoBet, poll, now),
            EngineStatus::CapitalGate
        );

        stats.consecutive_errors = 1;
        assert_eq!(engine_status(&stats, 3, Mode::Normal, poll, now), EngineStatus::Degraded);

        stats.consecutive_errors = 0;
        stats.last_fetch = Some(now - chrono::Duration::seconds(60));
        assert_eq!(engine_status(&stats, 3, Mode::Normal, poll, now), EngineStatus::Degraded);
    }
}
