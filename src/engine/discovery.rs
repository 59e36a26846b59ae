use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::db::models::Fixture;
use crate::db::StateStore;
use crate::error::EngineError;

pub const DISCOVERY_STORE_KEY: &str = "tier3_performance";

/// Combined shots on target above which a tier-3 observation counts.
const PRESSURE_SOG: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaguePerformance {
    pub total_observed: u32,
    pub potential_wins: u32,
    pub last_signal: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryState {
    pub leagues: HashMap<String, LeaguePerformance>,
    /// Fixtures flagged under pressure, with the goal total at flag time.
    #[serde(default)]
    pub pending: HashMap<String, u32>,
}

/// Silent performance tracker for discovery-only leagues. No capital is ever
/// involved; it only records how often pressure was followed by a goal.
pub struct DiscoveryTracker {
    state: Mutex<DiscoveryState>,
    store: Arc<dyn StateStore>,
}

impl DiscoveryTracker {
    pub fn load(store: Arc<dyn StateStore>) -> Self {
        let state = match store.load(DISCOVERY_STORE_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding corrupt discovery tracker state: {}", e);
                DiscoveryState::default()
            }),
            Ok(None) => DiscoveryState::default(),
            Err(e) => {
                warn!("Failed to load discovery tracker state: {}", e);
                DiscoveryState::default()
            }
        };
        DiscoveryTracker {
            state: Mutex::new(state),
            store,
        }
    }

    pub fn track(&self, fixture: &Fixture, now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = fixture.id().to_string();
        let goals = fixture.feed.score.total();
        let league = fixture.feed.league_name.clone();

        let scored = state.pending.get(&id).is_some_and(|&at_flag| goals > at_flag);
        if scored {
            state.pending.remove(&id);
        }

        let under_pressure = fixture.feed.stats.shots_on_target.total() > PRESSURE_SOG;
        if under_pressure {
            state.pending.entry(id).or_insert(goals);
        }

        if !scored && !under_pressure {
            return;
        }
        let perf = state.leagues.entry(league).or_default();
        if scored {
            perf.potential_wins += 1;
        }
        if under_pressure {
            perf.total_observed += 1;
            perf.last_signal = Some(now);
        }
        debug!(
            "Discovery {}: observed={} potential_wins={}",
            fixture.feed.league_name, perf.total_observed, perf.potential_wins
        );
        self.persist(&state);
    }

    /// Forget pending flags for fixtures that are no longer live.
    pub fn retain_live(&self, is_live: impl Fn(&str) -> bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let before = state.pending.len();
        state.pending.retain(|id, _| is_live(id));
        if state.pending.len() != before {
            self.persist(&state);
        }
    }

    pub fn snapshot(&self) -> DiscoveryState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn persist(&self, state: &DiscoveryState) {
        let result = serde_json::to_string(state)
            .map_err(EngineError::from)
            .and_then(|raw| self.store.save(DISCOVERY_STORE_KEY, &raw));
        if let Err(e) = result {
            warn!("Failed to persist discovery tracker: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Score, SidePair, Tier};
    use crate::db::MemoryStore;
    use crate::engine::risk::tests::fixture;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 28, 18, 0, 0).unwrap()
    }

    #[test]
    fn goal_after_pressure_counts_as_potential_win() {
        let store = Arc::new(MemoryStore::default());
        let tracker = DiscoveryTracker::load(store.clone());

        let mut f = fixture(Tier::Discovery, 50, Score::new(0, 0));
        f.feed.league_name = "Indonesia Liga 1".into();
        f.feed.stats.shots_on_target = SidePair::new(1, 1);
        tracker.track(&f, now());
        assert!(tracker.snapshot().leagues.is_empty());

        f.feed.stats.shots_on_target = SidePair::new(2, 1);
        tracker.track(&f, now());
        f.feed.score = Score::new(1, 0);
        tracker.track(&f, now());

        let state = tracker.snapshot();
        let perf = &state.leagues["Indonesia Liga 1"];
        assert_eq!(perf.total_observed, 2);
        assert_eq!(perf.potential_wins, 1);

        // persisted state survives a reload
        let reloaded = DiscoveryTracker::load(store);
        assert_eq!(reloaded.snapshot(), state);
    }

    #[test]
    fn corrupt_state_resets_to_empty() {
        let store = Arc::new(MemoryStore::default());
        store.save(DISCOVERY_STORE_KEY, "{not json").unwrap();
        let tracker = DiscoveryTracker::load(store);
        assert_eq!(tracker.snapshot(), DiscoveryState::default());
    }

    #[test]
    fn retain_live_drops_finished_fixtures() {
        let tracker = DiscoveryTracker::load(Arc::new(MemoryStore::default()));
        let mut f = fixture(Tier::Discovery, 50, Score::new(0, 0));
        f.feed.stats.shots_on_target = SidePair::new(3, 0);
        tracker.track(&f, now());
        assert_eq!(tracker.snapshot().pending.len(), 1);
        tracker.retain_live(|_| false);
        assert!(tracker.snapshot().pending.is_empty());
    }
}
