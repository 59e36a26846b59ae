use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::feed::history::HistoryBuffer;

/// Treats an explicit `null` like an absent field.
fn null_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

/// Fixture ids arrive as strings or integers depending on the upstream
/// provider; a missing or null id becomes empty.
fn fixture_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Option::<RawId>::deserialize(d)? {
        Some(RawId::Text(s)) => s.trim().to_string(),
        Some(RawId::Unsigned(n)) => n.to_string(),
        Some(RawId::Signed(n)) => n.to_string(),
        None => String::new(),
    })
}

/// Home/away pair for one statistic. Absent or null sides deserialize to
/// zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct SidePair<T> {
    #[serde(default, deserialize_with = "null_default")]
    pub home: T,
    #[serde(default, deserialize_with = "null_default")]
    pub away: T,
}

impl SidePair<u32> {
    pub fn new(home: u32, away: u32) -> Self {
        SidePair { home, away }
    }

    pub fn total(&self) -> u32 {
        self.home + self.away
    }

    /// True when either side recorded a non-zero value.
    pub fn is_present(&self) -> bool {
        self.home > 0 || self.away > 0
    }
}

impl SidePair<f64> {
    pub fn is_present(&self) -> bool {
        self.home > 0.0 || self.away > 0.0
    }
}

/// Per-match statistics bundle as delivered by the fixture normalizer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchStats {
    #[serde(deserialize_with = "null_default")]
    pub possession: SidePair<u32>,
    #[serde(deserialize_with = "null_default")]
    pub shots_on_target: SidePair<u32>,
    #[serde(deserialize_with = "null_default")]
    pub dangerous_attacks: SidePair<u32>,
    #[serde(deserialize_with = "null_default")]
    pub corners: SidePair<u32>,
    #[serde(deserialize_with = "null_default")]
    pub cards: SidePair<u32>,
    #[serde(deserialize_with = "null_default")]
    pub big_chances: SidePair<u32>,
    /// Provider-supplied expected goals, when the source has them.
    pub xg: Option<SidePair<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Score {
    #[serde(default, deserialize_with = "null_default")]
    pub home: u32,
    #[serde(default, deserialize_with = "null_default")]
    pub away: u32,
}

impl Score {
    pub fn new(home: u32, away: u32) -> Self {
        Score { home, away }
    }

    pub fn goal_diff(&self) -> u32 {
        self.home.abs_diff(self.away)
    }

    pub fn total(&self) -> u32 {
        self.home + self.away
    }

    /// True if any side's goal count went down compared to `prev`.
    pub fn regressed_from(&self, prev: &Score) -> bool {
        self.home < prev.home || self.away < prev.away
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.home, self.away)
    }
}

/// Match clock: either elapsed minutes or a textual phase label
/// ("67'", "45+2", "HT", "Halftime", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Minute {
    Elapsed(u32),
    Label(String),
}

impl Default for Minute {
    fn default() -> Self {
        Minute::Elapsed(0)
    }
}

impl Minute {
    /// Elapsed minutes. Labels are parsed on their leading digits
    /// ("45+2'" → 45); half-time labels count as 45; anything else is 0.
    pub fn elapsed(&self) -> u32 {
        match self {
            Minute::Elapsed(m) => *m,
            Minute::Label(label) => {
                let trimmed = label.trim();
                let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
                if let Ok(m) = digits.parse::<u32>() {
                    return m;
                }
                match trimmed.to_lowercase().as_str() {
                    "ht" | "halftime" | "half time" | "half-time" => 45,
                    _ => 0,
                }
            }
        }
    }
}

impl fmt::Display for Minute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Minute::Elapsed(m) => write!(f, "{}'", m),
            Minute::Label(l) => f.write_str(l),
        }
    }
}

/// Pre-match consensus pick (1 / X / 2) attached by the normalizer when the
/// consensus collaborator knows the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusPick {
    #[serde(rename = "HOME", alias = "1")]
    Home,
    #[serde(rename = "DRAW", alias = "X")]
    Draw,
    #[serde(rename = "AWAY", alias = "2")]
    Away,
}

/// Canonical fixture shape consumed from the fixture normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedFixture {
    /// Empty when the upstream entry carries no identity.
    #[serde(default, deserialize_with = "fixture_id")]
    pub id: String,
    pub home_team: String,
    pub away_team: String,
    #[serde(default, deserialize_with = "null_default")]
    pub league_name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub score: Score,
    #[serde(default, deserialize_with = "null_default")]
    pub minute: Minute,
    #[serde(default, deserialize_with = "null_default")]
    pub stats: MatchStats,
    /// Milliseconds since the data was produced upstream.
    #[serde(default, deserialize_with = "null_default")]
    pub latency_ms: u64,
    #[serde(default, deserialize_with = "null_default")]
    pub is_partial: bool,
    #[serde(default)]
    pub kickoff: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consensus: Option<ConsensusPick>,
}

impl FeedFixture {
    pub fn match_name(&self) -> String {
        format!("{} vs {}", self.home_team, self.away_team)
    }
}

/// League classification: 1 = top flight, 2 = second flight,
/// 3 = discovery only (never staked).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Tier {
    Top,
    Second,
    Discovery,
}

impl From<Tier> for u8 {
    fn from(t: Tier) -> u8 {
        match t {
            Tier::Top => 1,
            Tier::Second => 2,
            Tier::Discovery => 3,
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Tier::Top),
            2 => Ok(Tier::Second),
            3 => Ok(Tier::Discovery),
            other => Err(format!("unknown tier {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataQuality {
    Ok,
    Low,
}

/// Immutable point-in-time capture appended to a fixture's history once per
/// ingestion cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub dqs: f64,
    pub minute: Minute,
    pub score: Score,
    pub stats: MatchStats,
    pub latency_ms: u64,
}

/// A live match as published by the ingestion loop: the normalizer's fixture
/// plus everything the engine derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(flatten)]
    pub feed: FeedFixture,
    pub dqs: f64,
    pub data_quality: DataQuality,
    pub tier: Tier,
    /// Most recent first; `history.latest()` is this fixture's own snapshot.
    pub history: HistoryBuffer,
}

impl Fixture {
    pub fn id(&self) -> &str {
        &self.feed.id
    }
}

/// Fixture as reported by the independent secondary source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryFixture {
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub league_name: Option<String>,
    #[serde(default)]
    pub kickoff: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_default")]
    pub score: Score,
    #[serde(default, deserialize_with = "null_default")]
    pub minute: Minute,
}
