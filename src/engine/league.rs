use serde::{Deserialize, Serialize};

use crate::config::LeagueTiers;
use crate::db::models::Tier;

/// Classify a league by case-insensitive substring match against the
/// configured tier lists. The longest matching entry decides, so
/// "Austrian Bundesliga" lands in tier 2 even though it contains the tier-1
/// "Bundesliga"; equal-length matches go to the higher tier. Unknown leagues
/// are discovery-only.
pub fn classify(league_name: &str, tiers: &LeagueTiers) -> Tier {
    let name = league_name.to_lowercase();
    let longest = |list: &[String]| {
        list.iter()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty() && name.contains(l.as_str()))
            .map(|l| l.chars().count())
            .max()
    };
    match (longest(&tiers.tier1), longest(&tiers.tier2)) {
        (Some(top), Some(second)) if second > top => Tier::Second,
        (Some(_), _) => Tier::Top,
        (None, Some(_)) => Tier::Second,
        (None, None) => Tier::Discovery,
    }
}

/// Historical scoring traits of a league, attached to signals as an
/// observation only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueProfile {
    pub league_name: String,
    pub tier: Tier,
    pub avg_goals: f64,
    pub late_goal_prob: f64,
}

const PROFILES: &[(&str, f64, f64)] = &[
    ("premier league", 2.8, 0.22),
    ("süper lig", 2.6, 0.25),
    ("super lig", 2.6, 0.25),
    ("bundesliga", 3.1, 0.18),
];

const DEFAULT_AVG_GOALS: f64 = 2.5;
const DEFAULT_LATE_GOAL_PROB: f64 = 0.20;

/// Profile for `league_name`, or `None` when the module is disabled.
pub fn profile(league_name: &str, tier: Tier, enabled: bool) -> Option<LeagueProfile> {
    if !enabled {
        return None;
    }
    let name = league_name.to_lowercase();
    let (avg_goals, late_goal_prob) = PROFILES
        .iter()
        .find(|(key, _, _)| name.contains(key))
        .map(|&(_, g, p)| (g, p))
        .unwrap_or((DEFAULT_AVG_GOALS, DEFAULT_LATE_GOAL_PROB));
    Some(LeagueProfile {
        league_name: league_name.to_string(),
        tier,
        avg_goals,
        late_goal_prob,
    })
}
