//! Risk filter bank. Every rule is evaluated independently; nothing
//! short-circuits, so the signal always carries all three results.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;
use crate::db::models::{Fixture, Tier};

use super::reason::ReasonKind;

/// History entries needed before the momentum guard can fail.
const MOMENTUM_MIN_HISTORY: usize = 3;

/// Outcome of one filter. A failure always names its reason; serialized
/// as `{"status": "FAIL", "reason": "dead_match"}` or `{"status": "OK"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "UPPERCASE")]
pub enum FilterStatus {
    Ok,
    Fail(ReasonKind),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterResult {
    #[serde(flatten)]
    pub status: FilterStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl FilterResult {
    pub fn ok() -> Self {
        FilterResult {
            status: FilterStatus::Ok,
            detail: String::new(),
        }
    }

    fn fail(reason: ReasonKind, detail: String) -> Self {
        FilterResult {
            status: FilterStatus::Fail(reason),
            detail,
        }
    }

    pub fn failed(&self) -> bool {
        self.reason().is_some()
    }

    pub fn reason(&self) -> Option<ReasonKind> {
        match self.status {
            FilterStatus::Ok => None,
            FilterStatus::Fail(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFilters {
    pub dead_match: FilterResult,
    pub momentum: FilterResult,
    pub late_game: FilterResult,
}

impl RiskFilters {
    pub fn evaluate(fixture: &Fixture, cfg: &RiskConfig) -> Self {
        RiskFilters {
            dead_match: dead_match(fixture, cfg),
            momentum: momentum_guard(fixture, cfg),
            late_game: late_game(fixture, cfg),
        }
    }

    pub fn any_failed(&self) -> bool {
        self.first_failure().is_some()
    }

    /// First failing filter in dead-match, momentum, late-game order.
    pub fn first_failure(&self) -> Option<&FilterResult> {
        [&self.dead_match, &self.momentum, &self.late_game]
            .into_iter()
            .find(|f| f.failed())
    }
}

fn dead_match(fixture: &Fixture, cfg: &RiskConfig) -> FilterResult {
    let minute = fixture.feed.minute.elapsed();
    let score = fixture.feed.score;
    let diff = score.goal_diff();
    if minute >= cfg.dead_match_minute && diff >= cfg.dead_match_diff {
        return FilterResult::fail(
            ReasonKind::DeadMatch,
            format!("minute {} score {}", minute, score),
        );
    }
    if fixture.tier == Tier::Second
        && minute >= cfg.tier2_dead_match_minute
        && diff >= cfg.tier2_dead_match_diff
    {
        return FilterResult::fail(
            ReasonKind::DeadMatch,
            format!("tier-2 early dead match at minute {} score {}", minute, score),
        );
    }
    FilterResult::ok()
}

fn momentum_guard(fixture: &Fixture, cfg: &RiskConfig) -> FilterResult {
    let history = &fixture.history;
    if history.len() < MOMENTUM_MIN_HISTORY {
        return FilterResult::ok();
    }
    let window = match fixture.tier {
        Tier::Second => cfg.tier2_momentum_window_min,
        _ => cfg.momentum_window_min,
    };
    let (Some(latest), Some(older)) = (
        history.latest(),
        history.lookback(Duration::minutes(window as i64)),
    ) else {
        return FilterResult::ok();
    };
    let sog_diff = latest.stats.shots_on_target.total() as i64
        - older.stats.shots_on_target.total() as i64;
    let minute = fixture.feed.minute.elapsed();
    if sog_diff <= 0 && minute > cfg.momentum_guard_minute {
        return FilterResult::fail(
            ReasonKind::NoMomentum,
            format!("no shots on target in the last {} min", window),
        );
    }
    FilterResult::ok()
}

fn late_game(fixture: &Fixture, cfg: &RiskConfig) -> FilterResult {
    let minute = fixture.feed.minute.elapsed();
    if minute >= cfg.late_game_ban_minute {
        return FilterResult::fail(
            ReasonKind::LateGame,
            format!("minute {} is past the {}' cutoff", minute, cfg.late_game_ban_minute),
        );
    }
    FilterResult::ok()
}
