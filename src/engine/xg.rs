use serde::{Deserialize, Serialize};

use crate::db::models::MatchStats;

const XG_PER_SOG: f64 = 0.15;
const XG_PER_ATTACK: f64 = 0.02;
const XG_PER_BIG_CHANCE: f64 = 0.45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum XgSource {
    /// Passed through from the data provider.
    Primary,
    /// Linear estimate from shots, attacks and big chances.
    FallbackEstimate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XgEstimate {
    pub home: f64,
    pub away: f64,
    pub source: XgSource,
}

/// Expected goals for both sides. `None` when the module is disabled.
pub fn estimate(stats: &MatchStats, enabled: bool) -> Option<XgEstimate> {
    if !enabled {
        return None;
    }
    if let Some(xg) = stats.xg.filter(|xg| xg.is_present()) {
        return Some(XgEstimate {
            home: xg.home,
            away: xg.away,
            source: XgSource::Primary,
        });
    }
    let side = |sog: u32, attacks: u32, big: u32| {
        let v = sog as f64 * XG_PER_SOG + attacks as f64 * XG_PER_ATTACK + big as f64 * XG_PER_BIG_CHANCE;
        (v * 100.0).round() / 100.0
    };
    Some(XgEstimate {
        home: side(
            stats.shots_on_target.home,
            stats.dangerous_attacks.home,
            stats.big_chances.home,
        ),
        away: side(
            stats.shots_on_target.away,
            stats.dangerous_attacks.away,
            stats.big_chances.away,
        ),
        source: XgSource::FallbackEstimate,
    })
}
