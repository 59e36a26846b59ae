//! Momentum analytics derived from current stats and the history window:
//! Pressure Index, Velocity Trend and the edge score fed to the decision
//! engine.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::db::models::{MatchStats, Snapshot};
use crate::feed::history::HistoryBuffer;

const W_SOG: f64 = 15.0;
const W_ATTACKS: f64 = 1.5;
const W_CORNERS: f64 = 5.0;
const PRESSURE_CAP: f64 = 100.0;

/// Pressure points one side must lead by to count as dominant.
pub const DOMINANCE_MARGIN: u32 = 20;

/// Look-back for the velocity comparison.
pub const VELOCITY_WINDOW_MIN: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Home,
    Away,
}

/// Offensive intensity per side, each 0–100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PressureIndex {
    pub home: u32,
    pub away: u32,
    pub total: u32,
}

impl PressureIndex {
    pub fn calculate(stats: &MatchStats) -> Self {
        let side = |sog: u32, attacks: u32, corners: u32| {
            sog as f64 * W_SOG + attacks as f64 * W_ATTACKS + corners as f64 * W_CORNERS
        };
        let home = side(
            stats.shots_on_target.home,
            stats.dangerous_attacks.home,
            stats.corners.home,
        );
        let away = side(
            stats.shots_on_target.away,
            stats.dangerous_attacks.away,
            stats.corners.away,
        );
        let normalize = |v: f64| v.round().min(PRESSURE_CAP) as u32;
        PressureIndex {
            home: normalize(home),
            away: normalize(away),
            total: normalize(home + away),
        }
    }

    /// The side leading by at least `margin` points, if any.
    pub fn dominant_side(&self, margin: u32) -> Option<Side> {
        if self.home >= self.away + margin {
            Some(Side::Home)
        } else if self.away >= self.home + margin {
            Some(Side::Away)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Neutral,
    Hot,
    Warming,
    Stable,
    Cooling,
}

/// Rate-of-change classification of shots-on-target + corners over the last
/// ~10 minutes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityTrend {
    pub trend: Trend,
    pub multiplier: f64,
    /// Aggregate change against the comparison snapshot (0 when neutral).
    pub diff: i64,
}

impl VelocityTrend {
    pub fn neutral() -> Self {
        VelocityTrend {
            trend: Trend::Neutral,
            multiplier: 1.0,
            diff: 0,
        }
    }

    pub fn calculate(history: &HistoryBuffer) -> Self {
        if history.len() < 2 {
            return Self::neutral();
        }
        let (Some(latest), Some(earlier)) = (
            history.latest(),
            history.lookback(Duration::minutes(VELOCITY_WINDOW_MIN)),
        ) else {
            return Self::neutral();
        };
        Self::classify(aggregate(latest) - aggregate(earlier))
    }

    pub fn classify(diff: i64) -> Self {
        let (trend, multiplier) = if diff >= 3 {
            (Trend::Hot, 1.4)
        } else if diff >= 1 {
            (Trend::Warming, 1.2)
        } else if diff < 0 {
            (Trend::Cooling, 0.8)
        } else {
            (Trend::Stable, 1.0)
        };
        VelocityTrend {
            trend,
            multiplier,
            diff,
        }
    }
}

fn aggregate(s: &Snapshot) -> i64 {
    (s.stats.shots_on_target.total() + s.stats.corners.total()) as i64
}

/// Momentum proxy (0.1 per dangerous attack, 0.5 per shot on target, both
/// sides) scaled by the velocity multiplier. Market expectation is the
/// neutral baseline 1.0.
pub fn edge_score(stats: &MatchStats, velocity: &VelocityTrend) -> f64 {
    let momentum = stats.dangerous_attacks.total() as f64 * 0.1
        + stats.shots_on_target.total() as f64 * 0.5;
    let edge = momentum * velocity.multiplier;
    (edge * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SidePair;
    use crate::feed::history::tests::snapshot_at;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn stats(sog: (u32, u32), corners: (u32, u32)) -> MatchStats {
        MatchStats {
            shots_on_target: SidePair::new(sog.0, sog.1),
            corners: SidePair::new(corners.0, corners.1),
            ..MatchStats::default()
        }
    }

    #[test]
    fn pressure_weights_and_caps() {
        let s = MatchStats {
            shots_on_target: SidePair::new(2, 0),
            dangerous_attacks: SidePair::new(10, 4),
            corners: SidePair::new(3, 1),
            ..MatchStats::default()
        };
        let p = PressureIndex::calculate(&s);
        // home: 30 + 15 + 15 = 60, away: 0 + 6 + 5 = 11
        assert_eq!(p, PressureIndex { home: 60, away: 11, total: 71 });
        assert_eq!(p.dominant_side(DOMINANCE_MARGIN), Some(Side::Home));

        let heavy = MatchStats {
            shots_on_target: SidePair::new(9, 8),
            ..MatchStats::default()
        };
        let p = PressureIndex::calculate(&heavy);
        assert_eq!(p.home, 100);
        assert_eq!(p.away, 100);
        assert_eq!(p.total, 100);
        assert_eq!(p.dominant_side(DOMINANCE_MARGIN), None);
    }

    #[test]
    fn velocity_needs_two_snapshots() {
        let mut h = HistoryBuffer::new();
        assert_eq!(VelocityTrend::calculate(&h), VelocityTrend::neutral());
        let t0 = Utc.with_ymd_and_hms(2024, 12, 28, 18, 0, 0).unwrap();
        h.push(snapshot_at(t0, stats((1, 0), (0, 0))));
        assert_eq!(VelocityTrend::calculate(&h).trend, Trend::Neutral);
    }

    #[test]
    fn three_extra_shots_and_corners_over_ten_minutes_is_hot() {
        let t0 = Utc.with_ymd_and_hms(2024, 12, 28, 18, 0, 0).unwrap();
        let mut h = HistoryBuffer::new();
        h.push(snapshot_at(t0, stats((1, 1), (1, 0))));
        h.push(snapshot_at(t0 + Duration::minutes(5), stats((2, 1), (1, 0))));
        h.push(snapshot_at(t0 + Duration::minutes(10), stats((3, 1), (1, 1))));

        let v = VelocityTrend::calculate(&h);
        assert_eq!(v.trend, Trend::Hot);
        assert_eq!(v.diff, 3);
        assert_relative_eq!(v.multiplier, 1.4);
    }

    #[test]
    fn classify_boundaries() {
        assert_eq!(VelocityTrend::classify(3).trend, Trend::Hot);
        assert_eq!(VelocityTrend::classify(2).trend, Trend::Warming);
        assert_eq!(VelocityTrend::classify(1).trend, Trend::Warming);
        assert_eq!(VelocityTrend::classify(0).trend, Trend::Stable);
        let cooling = VelocityTrend::classify(-1);
        assert_eq!(cooling.trend, Trend::Cooling);
        assert_relative_eq!(cooling.multiplier, 0.8);
    }

    #[test]
    fn hot_velocity_raises_edge_score() {
        let s = MatchStats {
            shots_on_target: SidePair::new(2, 1),
            dangerous_attacks: SidePair::new(8, 4),
            ..MatchStats::default()
        };
        let stable = edge_score(&s, &VelocityTrend::classify(0));
        let hot = edge_score(&s, &VelocityTrend::classify(3));
        assert_relative_eq!(stable, 2.7);
        assert_relative_eq!(hot, 3.78);
        assert!(hot > stable);
    }
}
