//! Decision engine: turns a scored fixture plus the bankroll mode into a
//! BET / PASS / NO-BET signal with a machine-readable reason.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::bankroll::Mode;
use crate::config::{DecisionConfig, DecisionMode, ModuleToggles, RiskConfig};
use crate::db::models::{ConsensusPick, Fixture, SecondaryFixture, Tier};

use super::bayesian::{self, BayesianRefinement};
use super::discovery::DiscoveryTracker;
use super::league::{self, LeagueProfile};
use super::momentum::{self, PressureIndex, Side, VelocityTrend, DOMINANCE_MARGIN};
use super::reason::ReasonKind;
use super::risk::{FilterResult, FilterStatus, RiskFilters};
use super::validator::{SecondaryValidator, Validation};
use super::xg::{self, XgEstimate};

pub const DECISION_LOG_CAPACITY: usize = 100;

/// Neutral prior fed to the Bayesian refinement.
const BAYESIAN_PRIOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "BET")]
    Bet,
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "NO-BET")]
    NoBet,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Bet => "BET",
            Verdict::Pass => "PASS",
            Verdict::NoBet => "NO-BET",
        }
    }
}

/// Analytics attached to every signal. Never used for the verdict except the
/// edge score in full-stack mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observations {
    pub pressure: PressureIndex,
    pub velocity: VelocityTrend,
    pub edge_score: f64,
    pub xg: Option<XgEstimate>,
    pub bayesian: Option<BayesianRefinement>,
    pub league_profile: Option<LeagueProfile>,
    /// Pre-match consensus favours the side the pressure index says is
    /// being dominated.
    pub reverse_signal: bool,
    pub counter_arguments: Vec<String>,
    pub secondary: Option<Validation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub fixture_id: String,
    pub match_name: String,
    pub verdict: Verdict,
    pub reason: String,
    pub reason_key: ReasonKind,
    pub dqs: f64,
    pub tier: Tier,
    pub risk_filters: RiskFilters,
    pub timestamp: DateTime<Utc>,
    pub observations: Observations,
}

pub struct DecisionEngine {
    cfg: DecisionConfig,
    risk: RiskConfig,
    toggles: RwLock<ModuleToggles>,
    validator: SecondaryValidator,
    discovery: DiscoveryTracker,
    log: Mutex<VecDeque<Signal>>,
    latest: RwLock<HashMap<String, Signal>>,
}

impl DecisionEngine {
    pub fn new(
        cfg: DecisionConfig,
        risk: RiskConfig,
        toggles: ModuleToggles,
        discovery: DiscoveryTracker,
    ) -> Self {
        let validator =
            SecondaryValidator::new(cfg.secondary_minute_tolerance, cfg.secondary_kickoff_tolerance_min);
        DecisionEngine {
            cfg,
            risk,
            toggles: RwLock::new(toggles),
            validator,
            discovery,
            log: Mutex::new(VecDeque::with_capacity(DECISION_LOG_CAPACITY)),
            latest: RwLock::new(HashMap::new()),
        }
    }

    pub fn toggles(&self) -> ModuleToggles {
        *self.toggles.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_toggles(&self, toggles: ModuleToggles) {
        info!("Module toggles updated: {:?}", toggles);
        *self.toggles.write().unwrap_or_else(|e| e.into_inner()) = toggles;
    }

    /// Evaluate one fixture. Records the signal in the decision log and as
    /// the fixture's latest signal.
    pub fn evaluate(
        &self,
        fixture: &Fixture,
        mode: Mode,
        secondary: &[SecondaryFixture],
        now: DateTime<Utc>,
    ) -> Signal {
        let toggles = self.toggles();
        let risk_filters = RiskFilters::evaluate(fixture, &self.risk);
        let mut observations = self.observe(fixture, &toggles);
        let dqs = fixture.dqs;

        let (mut verdict, mut reason_key, mut detail) = if mode == Mode::NoBet {
            (Verdict::Pass, ReasonKind::BankrollStop, String::new())
        } else if dqs < self.cfg.dqs_threshold {
            (Verdict::Pass, ReasonKind::LowDqs, format!("{:.2}", dqs))
        } else if fixture.tier == Tier::Discovery {
            self.discovery.track(fixture, now);
            (Verdict::Pass, ReasonKind::DiscoveryOnly, String::new())
        } else if fixture.tier == Tier::Top
            && dqs >= self.cfg.fast_track_dqs
            && !risk_filters.any_failed()
        {
            (Verdict::Bet, ReasonKind::FastTrack, format!("{:.2}", dqs))
        } else if self.cfg.mode == DecisionMode::CoreDqs {
            (Verdict::Bet, ReasonKind::DqsApproved, format!("{:.2}", dqs))
        } else if let Some(FilterResult {
            status: FilterStatus::Fail(reason),
            detail,
        }) = risk_filters.first_failure()
        {
            (Verdict::Pass, *reason, detail.clone())
        } else if self.cfg.mode == DecisionMode::FullStack
            && observations.edge_score <= self.cfg.edge_score_threshold
        {
            (
                Verdict::Pass,
                ReasonKind::NoEdge,
                format!("{:.2} <= {:.2}", observations.edge_score, self.cfg.edge_score_threshold),
            )
        } else {
            (Verdict::Bet, ReasonKind::RiskClear, String::new())
        };

        if toggles.secondary_validation {
            let validation = self.validator.validate(&fixture.feed, secondary, now);
            if validation.is_mismatch() {
                verdict = Verdict::NoBet;
                reason_key = ReasonKind::SourceMismatch;
                detail = String::new();
            }
            observations.secondary = Some(validation);
        }

        let reason = if detail.is_empty() {
            reason_key.to_string()
        } else {
            format!("{} ({})", reason_key, detail)
        };
        let signal = Signal {
            fixture_id: fixture.id().to_string(),
            match_name: fixture.feed.match_name(),
            verdict,
            reason,
            reason_key,
            dqs,
            tier: fixture.tier,
            risk_filters,
            timestamp: now,
            observations,
        };
        debug!(
            "Signal {} {}: {} [{}] {}",
            signal.fixture_id,
            signal.match_name,
            signal.verdict.as_str(),
            signal.reason_key.key(),
            signal.reason
        );
        self.record(&signal);
        signal
    }

    fn observe(&self, fixture: &Fixture, toggles: &ModuleToggles) -> Observations {
        let stats = &fixture.feed.stats;
        let pressure = PressureIndex::calculate(stats);
        let velocity = VelocityTrend::calculate(&fixture.history);
        let edge_score = momentum::edge_score(stats, &velocity);

        let reverse_signal = match (fixture.feed.consensus, pressure.dominant_side(DOMINANCE_MARGIN)) {
            (Some(ConsensusPick::Home), Some(Side::Away)) => true,
            (Some(ConsensusPick::Away), Some(Side::Home)) => true,
            _ => false,
        };

        let minute = fixture.feed.minute.elapsed();
        let mut counter_arguments = Vec::new();
        if minute > self.risk.late_game_ban_minute {
            counter_arguments.push("Approaching full time".to_string());
        }
        if fixture.feed.score.total() > 3 {
            counter_arguments.push("High-scoring match saturation".to_string());
        }

        Observations {
            pressure,
            velocity,
            edge_score,
            xg: xg::estimate(stats, toggles.xg),
            bayesian: bayesian::refine(BAYESIAN_PRIOR, edge_score, toggles.bayesian),
            league_profile: league::profile(
                &fixture.feed.league_name,
                fixture.tier,
                toggles.league_profiles,
            ),
            reverse_signal,
            counter_arguments,
            secondary: None,
        }
    }

    fn record(&self, signal: &Signal) {
        {
            let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
            log.push_back(signal.clone());
            while log.len() > DECISION_LOG_CAPACITY {
                log.pop_front();
            }
        }
        self.latest
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(signal.fixture_id.clone(), signal.clone());
    }

    pub fn latest_signal(&self, fixture_id: &str) -> Option<Signal> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(fixture_id)
            .cloned()
    }

    pub fn latest_signals(&self) -> Vec<Signal> {
        let latest = self.latest.read().unwrap_or_else(|e| e.into_inner());
        let mut signals: Vec<Signal> = latest.values().cloned().collect();
        signals.sort_by(|a, b| a.fixture_id.cmp(&b.fixture_id));
        signals
    }

    /// Drop signals (and discovery flags) of fixtures that are no longer live.
    pub fn retain_live(&self, is_live: impl Fn(&str) -> bool) {
        self.latest
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|id, _| is_live(id));
        self.discovery.retain_live(is_live);
    }

    /// Oldest first.
    pub fn decision_log(&self) -> Vec<Signal> {
        let log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.iter().cloned().collect()
    }

    pub fn decision_log_len(&self) -> usize {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn secondary_log_len(&self) -> usize {
        self.validator.log_len()
    }

    pub fn discovery(&self) -> &DiscoveryTracker {
        &self.discovery
    }
}
