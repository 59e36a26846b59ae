//! Cross-checks primary fixtures against an independent secondary feed.
//! Observational: the only effect on decisions is the `NO-BET` override on a
//! mismatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

use crate::db::models::{FeedFixture, Score, SecondaryFixture};

pub const OBSERVATION_LOG_CAPACITY: usize = 500;

/// Club affixes ignored when comparing team names.
const NAME_AFFIXES: &[&str] = &["fc", "afc", "sc", "cf", "ue", "sd", "cd", "de", "la", "the"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub match_id: String,
    pub timestamp: DateTime<Utc>,
    pub consistent: bool,
    pub score_match: bool,
    pub minute_match: bool,
    pub primary_score: Score,
    pub secondary_score: Score,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Validation {
    NotFound,
    Consistent(Observation),
    Mismatch(Observation),
}

impl Validation {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Validation::Mismatch(_))
    }
}

pub struct SecondaryValidator {
    minute_tolerance: u32,
    kickoff_tolerance_min: i64,
    log: Mutex<VecDeque<Observation>>,
}

impl SecondaryValidator {
    pub fn new(minute_tolerance: u32, kickoff_tolerance_min: i64) -> Self {
        SecondaryValidator {
            minute_tolerance,
            kickoff_tolerance_min,
            log: Mutex::new(VecDeque::with_capacity(OBSERVATION_LOG_CAPACITY)),
        }
    }

    pub fn validate(
        &self,
        primary: &FeedFixture,
        secondary: &[SecondaryFixture],
        now: DateTime<Utc>,
    ) -> Validation {
        let Some(other) = self.find_match(primary, secondary) else {
            return Validation::NotFound;
        };

        let score_match = primary.score == other.score;
        let minute_match = primary
            .minute
            .elapsed()
            .abs_diff(other.minute.elapsed())
            <= self.minute_tolerance;
        let obs = Observation {
            match_id: primary.id.clone(),
            timestamp: now,
            consistent: score_match && minute_match,
            score_match,
            minute_match,
            primary_score: primary.score,
            secondary_score: other.score,
        };
        self.record(obs.clone());

        if obs.consistent {
            Validation::Consistent(obs)
        } else {
            warn!(
                "Secondary source conflict for {} ({}): primary {} {} vs secondary {} {}",
                primary.id,
                primary.match_name(),
                primary.score,
                primary.minute,
                other.score,
                other.minute
            );
            Validation::Mismatch(obs)
        }
    }

    /// Match on league, kickoff time within tolerance, then fuzzy team names.
    /// League and kickoff are only compared when both sides report them.
    fn find_match<'a>(
        &self,
        primary: &FeedFixture,
        secondary: &'a [SecondaryFixture],
    ) -> Option<&'a SecondaryFixture> {
        let home = normalize_name(&primary.home_team);
        let away = normalize_name(&primary.away_team);
        secondary.iter().find(|sec| {
            if let Some(league) = &sec.league_name {
                if !league.trim().eq_ignore_ascii_case(primary.league_name.trim()) {
                    return false;
                }
            }
            if let (Some(a), Some(b)) = (primary.kickoff, sec.kickoff) {
                if (a - b).num_minutes().abs() > self.kickoff_tolerance_min {
                    return false;
                }
            }
            names_match(&home, &normalize_name(&sec.home_team))
                && names_match(&away, &normalize_name(&sec.away_team))
        })
    }

    fn record(&self, obs: Observation) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.push_back(obs);
        while log.len() > OBSERVATION_LOG_CAPACITY {
            log.pop_front();
        }
    }

    pub fn log_len(&self) -> usize {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Lowercase, drop club affixes, keep alphanumerics only.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty() && !NAME_AFFIXES.contains(word))
        .collect()
}

fn names_match(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a == b || a.contains(b) || b.contains(a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Minute;
    use crate::engine::dqs::tests::feed;
    use chrono::{Duration, TimeZone};

    fn secondary(home: &str, away: &str, score: Score, minute: u32) -> SecondaryFixture {
        SecondaryFixture {
            home_team: home.into(),
            away_team: away.into(),
            league_name: Some("Süper Lig".into()),
            kickoff: None,
            score,
            minute: Minute::Elapsed(minute),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 28, 18, 40, 0).unwrap()
    }

    #[test]
    fn normalizes_affixes_and_punctuation() {
        assert_eq!(normalize_name("Galatasaray S.K."), "galatasaraysk");
        assert_eq!(normalize_name("FC Barcelona"), "barcelona");
        assert_eq!(normalize_name("The Strongest"), "strongest");
        assert_eq!(normalize_name("Fenerbahçe"), "fenerbahçe");
    }

    #[test]
    fn fuzzy_names_match_and_agree() {
        let v = SecondaryValidator::new(2, 5);
        let mut f = feed("7", "Süper Lig");
        f.score = Score::new(1, 0);
        let others = vec![
            secondary("Besiktas", "Trabzonspor", Score::new(0, 0), 40),
            secondary("Galatasaray SK", "Fenerbahçe", Score::new(1, 0), 41),
        ];
        match v.validate(&f, &others, now()) {
            Validation::Consistent(obs) => {
                assert!(obs.score_match && obs.minute_match);
                assert_eq!(obs.match_id, "7");
            }
            other => panic!("expected consistent, got {:?}", other),
        }
        assert_eq!(v.log_len(), 1);
    }

    #[test]
    fn score_or_minute_disagreement_is_a_mismatch() {
        let v = SecondaryValidator::new(2, 5);
        let f = feed("7", "Süper Lig");
        let others = vec![secondary("Galatasaray", "Fenerbahce", Score::new(0, 0), 44)];
        // "fenerbahce" vs "fenerbahçe" do not contain each other
        assert_eq!(v.validate(&f, &others, now()), Validation::NotFound);

        let others = vec![secondary("Galatasaray", "Fenerbahçe", Score::new(0, 0), 44)];
        let result = v.validate(&f, &others, now());
        assert!(result.is_mismatch());

        let others = vec![secondary("Galatasaray", "Fenerbahçe", Score::new(0, 1), 40)];
        assert!(v.validate(&f, &others, now()).is_mismatch());
    }

    #[test]
    fn league_and_kickoff_gate_the_match() {
        let v = SecondaryValidator::new(2, 5);
        let mut f = feed("7", "Süper Lig");
        let ko = Utc.with_ymd_and_hms(2024, 12, 28, 18, 0, 0).unwrap();
        f.kickoff = Some(ko);

        let mut other = secondary("Galatasaray", "Fenerbahçe", Score::new(0, 0), 40);
        other.league_name = Some("Premier League".into());
        assert_eq!(v.validate(&f, &[other.clone()], now()), Validation::NotFound);

        other.league_name = None;
        other.kickoff = Some(ko + Duration::minutes(10));
        assert_eq!(v.validate(&f, &[other.clone()], now()), Validation::NotFound);

        other.kickoff = Some(ko + Duration::minutes(3));
        assert!(matches!(
            v.validate(&f, &[other], now()),
            Validation::Consistent(_)
        ));
    }

    #[test]
    fn observation_log_is_capped() {
        let v = SecondaryValidator::new(2, 5);
        let f = feed("7", "Süper Lig");
        let others = vec![secondary("Galatasaray", "Fenerbahçe", Score::new(0, 0), 40)];
        for _ in 0..(OBSERVATION_LOG_CAPACITY + 20) {
            v.validate(&f, &others, now());
        }
        assert_eq!(v.log_len(), OBSERVATION_LOG_CAPACITY);
    }
}
