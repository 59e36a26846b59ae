use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Live match signal engine: DQS scoring, momentum/risk verdicts and a
/// bankroll ledger
#[derive(Parser, Debug, Clone)]
#[command(name = "live-signal-engine", version, about)]
pub struct Config {
    /// API listen address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8080")]
    pub api_addr: String,

    /// SQLite database path (bankroll state and discovery tracker)
    #[arg(long, env = "DATABASE_PATH", default_value = "live_signal.db")]
    pub database_path: String,

    /// Fixture normalizer base URL (canonical fixture JSON)
    #[arg(long, env = "NORMALIZER_URL", default_value = "http://localhost:3001/api/")]
    pub normalizer_url: String,

    /// Secondary validation source base URL; validation is off when unset
    #[arg(long, env = "SECONDARY_URL")]
    pub secondary_url: Option<String>,

    /// Ingestion cycle interval in seconds
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "10")]
    pub poll_interval_secs: u64,

    /// Timeout for every upstream fetch in milliseconds
    #[arg(long, env = "FETCH_TIMEOUT_MS", default_value = "5000")]
    pub fetch_timeout_ms: u64,

    /// Health snapshot interval in seconds
    #[arg(long, env = "HEALTH_INTERVAL_SECS", default_value = "300")]
    pub health_interval_secs: u64,

    // ── Data quality ────────────────────────────────────────────────────────
    /// Minimum DQS for a fixture to be analysed
    #[arg(long, env = "DQS_THRESHOLD", default_value = "0.70")]
    pub dqs_threshold: f64,

    /// DQS latency component weight
    #[arg(long, env = "DQS_WEIGHT_LATENCY", default_value = "0.4")]
    pub dqs_weight_latency: f64,

    /// DQS stats-availability component weight
    #[arg(long, env = "DQS_WEIGHT_STATS", default_value = "0.4")]
    pub dqs_weight_stats: f64,

    /// DQS freshness component weight
    #[arg(long, env = "DQS_WEIGHT_FRESHNESS", default_value = "0.2")]
    pub dqs_weight_freshness: f64,

    /// Latency (ms) under which the latency component gets full weight
    #[arg(long, env = "FAST_LATENCY_MS", default_value = "5000")]
    pub fast_latency_ms: u64,

    /// Latency (ms) under which the latency component gets half weight
    #[arg(long, env = "LATENCY_THRESHOLD_MS", default_value = "30000")]
    pub latency_threshold_ms: u64,

    // ── Decision ────────────────────────────────────────────────────────────
    /// Decision mode
    #[arg(long, env = "DECISION_MODE", value_enum, default_value = "core-dqs")]
    pub decision_mode: DecisionMode,

    /// DQS required for the tier-1 fast-track BET path
    #[arg(long, env = "FAST_TRACK_DQS", default_value = "0.85")]
    pub fast_track_dqs: f64,

    /// Minimum edge score for a BET in full-stack mode
    #[arg(long, env = "EDGE_SCORE_THRESHOLD", default_value = "1.20")]
    pub edge_score_threshold: f64,

    // ── Risk filters ────────────────────────────────────────────────────────
    #[arg(long, env = "DEAD_MATCH_MINUTE", default_value = "75")]
    pub dead_match_minute: u32,

    #[arg(long, env = "DEAD_MATCH_DIFF", default_value = "2")]
    pub dead_match_diff: u32,

    #[arg(long, env = "TIER2_DEAD_MATCH_MINUTE", default_value = "70")]
    pub tier2_dead_match_minute: u32,

    #[arg(long, env = "TIER2_DEAD_MATCH_DIFF", default_value = "1")]
    pub tier2_dead_match_diff: u32,

    /// Momentum guard look-back in minutes
    #[arg(long, env = "MOMENTUM_WINDOW_MIN", default_value = "10")]
    pub momentum_window_min: u32,

    /// Momentum guard look-back for tier-2 leagues in minutes
    #[arg(long, env = "TIER2_MOMENTUM_WINDOW_MIN", default_value = "15")]
    pub tier2_momentum_window_min: u32,

    /// Match minute after which a stalled momentum fails the guard
    #[arg(long, env = "MOMENTUM_GUARD_MINUTE", default_value = "60")]
    pub momentum_guard_minute: u32,

    /// Hard cutoff minute for any bet
    #[arg(long, env = "LATE_GAME_BAN_MINUTE", default_value = "85")]
    pub late_game_ban_minute: u32,

    // ── Bankroll ────────────────────────────────────────────────────────────
    /// Starting bankroll for a fresh deployment
    #[arg(long, env = "INITIAL_BALANCE", default_value = "2000.0")]
    pub initial_balance: f64,

    #[arg(long, env = "CAUTION_LOSS_STREAK", default_value = "2")]
    pub caution_loss_streak: u32,

    #[arg(long, env = "STOP_LOSS_STREAK", default_value = "3")]
    pub stop_loss_streak: u32,

    #[arg(long, env = "DAILY_LOSS_LIMIT", default_value = "3")]
    pub daily_loss_limit: u32,

    #[arg(long, env = "DAILY_BET_LIMIT", default_value = "5")]
    pub daily_bet_limit: u32,

    /// Stake as a fraction of balance for tier-1 leagues
    #[arg(long, env = "TIER1_STAKE_PCT", default_value = "0.01")]
    pub tier1_stake_pct: f64,

    /// Stake as a fraction of balance for tier-2 leagues
    #[arg(long, env = "TIER2_STAKE_PCT", default_value = "0.005")]
    pub tier2_stake_pct: f64,

    /// Stake multiplier while in CAUTION mode
    #[arg(long, env = "CAUTION_STAKE_MULTIPLIER", default_value = "0.5")]
    pub caution_stake_multiplier: f64,

    /// Daily P/L ratio that stops betting for the day (e.g. 0.05 = +5%)
    #[arg(long, env = "DAILY_TAKE_PROFIT", default_value = "0.05")]
    pub daily_take_profit: f64,

    /// Daily P/L ratio that stops betting for the day (e.g. -0.03 = -3%)
    #[arg(long, env = "DAILY_STOP_LOSS", default_value = "-0.03", allow_hyphen_values = true)]
    pub daily_stop_loss: f64,

    // ── Optional modules ────────────────────────────────────────────────────
    #[arg(long, env = "ENABLE_XG", default_value = "false")]
    pub enable_xg: bool,

    #[arg(long, env = "ENABLE_BAYESIAN", default_value = "false")]
    pub enable_bayesian: bool,

    #[arg(long, env = "ENABLE_LEAGUE_PROFILES", default_value = "false")]
    pub enable_league_profiles: bool,

    /// Allowed minute disagreement with the secondary source
    #[arg(long, env = "SECONDARY_MINUTE_TOLERANCE", default_value = "2")]
    pub secondary_minute_tolerance: u32,

    /// Allowed kickoff-time disagreement with the secondary source (minutes)
    #[arg(long, env = "SECONDARY_KICKOFF_TOLERANCE_MIN", default_value = "5")]
    pub secondary_kickoff_tolerance_min: i64,

    // ── League tiers ────────────────────────────────────────────────────────
    #[arg(
        long,
        env = "TIER1_LEAGUES",
        value_delimiter = ',',
        default_value = "Süper Lig,Premier League,Bundesliga,LaLiga,Serie A,Ligue 1,Champions League,Europa League"
    )]
    pub tier1_leagues: Vec<String>,

    #[arg(
        long,
        env = "TIER2_LEAGUES",
        value_delimiter = ',',
        default_value = "Eredivisie,Primeira Liga,Pro League,Austrian Bundesliga,Super League,Superliga,Scottish Premiership,MLS"
    )]
    pub tier2_leagues: Vec<String>,
}

/// How strictly the decision engine weighs risk filters outside fast-track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionMode {
    /// BET whenever DQS passes.
    CoreDqs,
    /// BET only when DQS passes and every risk filter is OK.
    DqsRisk,
    /// As `DqsRisk`, and the edge score must clear its threshold.
    FullStack,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DqsConfig {
    pub threshold: f64,
    pub weight_latency: f64,
    pub weight_stats: f64,
    pub weight_freshness: f64,
    pub fast_latency_ms: u64,
    pub latency_threshold_ms: u64,
}

impl Default for DqsConfig {
    fn default() -> Self {
        DqsConfig {
            threshold: 0.70,
            weight_latency: 0.4,
            weight_stats: 0.4,
            weight_freshness: 0.2,
            fast_latency_ms: 5_000,
            latency_threshold_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    pub dead_match_minute: u32,
    pub dead_match_diff: u32,
    pub tier2_dead_match_minute: u32,
    pub tier2_dead_match_diff: u32,
    pub momentum_window_min: u32,
    pub tier2_momentum_window_min: u32,
    pub momentum_guard_minute: u32,
    pub late_game_ban_minute: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            dead_match_minute: 75,
            dead_match_diff: 2,
            tier2_dead_match_minute: 70,
            tier2_dead_match_diff: 1,
            momentum_window_min: 10,
            tier2_momentum_window_min: 15,
            momentum_guard_minute: 60,
            late_game_ban_minute: 85,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BankrollConfig {
    pub initial_balance: f64,
    pub caution_loss_streak: u32,
    pub stop_loss_streak: u32,
    pub daily_loss_limit: u32,
    pub daily_bet_limit: u32,
    pub tier1_stake_pct: f64,
    pub tier2_stake_pct: f64,
    pub caution_stake_multiplier: f64,
    pub daily_take_profit: f64,
    pub daily_stop_loss: f64,
}

impl Default for BankrollConfig {
    fn default() -> Self {
        BankrollConfig {
            initial_balance: 2000.0,
            caution_loss_streak: 2,
            stop_loss_streak: 3,
            daily_loss_limit: 3,
            daily_bet_limit: 5,
            tier1_stake_pct: 0.01,
            tier2_stake_pct: 0.005,
            caution_stake_multiplier: 0.5,
            daily_take_profit: 0.05,
            daily_stop_loss: -0.03,
        }
    }
}

/// Optional-module switches. The only configuration the presentation layer
/// may flip at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModuleToggles {
    pub xg: bool,
    pub bayesian: bool,
    pub league_profiles: bool,
    pub secondary_validation: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionConfig {
    pub mode: DecisionMode,
    pub dqs_threshold: f64,
    pub fast_track_dqs: f64,
    pub edge_score_threshold: f64,
    pub secondary_minute_tolerance: u32,
    pub secondary_kickoff_tolerance_min: i64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        DecisionConfig {
            mode: DecisionMode::CoreDqs,
            dqs_threshold: 0.70,
            fast_track_dqs: 0.85,
            edge_score_threshold: 1.20,
            secondary_minute_tolerance: 2,
            secondary_kickoff_tolerance_min: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeagueTiers {
    pub tier1: Vec<String>,
    pub tier2: Vec<String>,
}

impl Default for LeagueTiers {
    fn default() -> Self {
        let split = |s: &str| s.split(',').map(str::to_string).collect::<Vec<_>>();
        LeagueTiers {
            tier1: split("Süper Lig,Premier League,Bundesliga,LaLiga,Serie A,Ligue 1,Champions League,Europa League"),
            tier2: split("Eredivisie,Primeira Liga,Pro League,Austrian Bundesliga,Super League,Superliga,Scottish Premiership,MLS"),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.1..=1.0).contains(&self.dqs_threshold) {
            anyhow::bail!("dqs_threshold must be between 0.1 and 1.0");
        }
        if self.fast_track_dqs < self.dqs_threshold || self.fast_track_dqs > 1.0 {
            anyhow::bail!("fast_track_dqs must be between dqs_threshold and 1.0");
        }
        for (name, w) in [
            ("dqs_weight_latency", self.dqs_weight_latency),
            ("dqs_weight_stats", self.dqs_weight_stats),
            ("dqs_weight_freshness", self.dqs_weight_freshness),
        ] {
            if !(0.0..=1.0).contains(&w) {
                anyhow::bail!("{} must be between 0.0 and 1.0", name);
            }
        }
        if self.fast_latency_ms > self.latency_threshold_ms {
            anyhow::bail!("fast_latency_ms must not exceed latency_threshold_ms");
        }
        if self.poll_interval_secs == 0 || self.health_interval_secs == 0 {
            anyhow::bail!("poll and health intervals must be positive");
        }
        if self.fetch_timeout_ms == 0 {
            anyhow::bail!("fetch_timeout_ms must be positive");
        }
        if self.initial_balance <= 0.0 {
            anyhow::bail!("initial_balance must be positive");
        }
        if !(0.0..=1.0).contains(&self.tier1_stake_pct)
            || !(0.0..=1.0).contains(&self.tier2_stake_pct)
        {
            anyhow::bail!("stake percentages must be between 0.0 and 1.0");
        }
        if self.tier2_stake_pct > self.tier1_stake_pct {
            anyhow::bail!("tier2_stake_pct must not exceed tier1_stake_pct");
        }
        if !(0.0..=1.0).contains(&self.caution_stake_multiplier) {
            anyhow::bail!("caution_stake_multiplier must be between 0.0 and 1.0");
        }
        if self.daily_take_profit <= 0.0 {
            anyhow::bail!("daily_take_profit must be positive");
        }
        if self.daily_stop_loss >= 0.0 {
            anyhow::bail!("daily_stop_loss must be negative");
        }
        if self.caution_loss_streak > self.stop_loss_streak {
            anyhow::bail!("caution_loss_streak must not exceed stop_loss_streak");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn dqs(&self) -> DqsConfig {
        DqsConfig {
            threshold: self.dqs_threshold,
            weight_latency: self.dqs_weight_latency,
            weight_stats: self.dqs_weight_stats,
            weight_freshness: self.dqs_weight_freshness,
            fast_latency_ms: self.fast_latency_ms,
            latency_threshold_ms: self.latency_threshold_ms,
        }
    }

    pub fn risk(&self) -> RiskConfig {
        RiskConfig {
            dead_match_minute: self.dead_match_minute,
            dead_match_diff: self.dead_match_diff,
            tier2_dead_match_minute: self.tier2_dead_match_minute,
            tier2_dead_match_diff: self.tier2_dead_match_diff,
            momentum_window_min: self.momentum_window_min,
            tier2_momentum_window_min: self.tier2_momentum_window_min,
            momentum_guard_minute: self.momentum_guard_minute,
            late_game_ban_minute: self.late_game_ban_minute,
        }
    }

    pub fn bankroll(&self) -> BankrollConfig {
        BankrollConfig {
            initial_balance: self.initial_balance,
            caution_loss_streak: self.caution_loss_streak,
            stop_loss_streak: self.stop_loss_streak,
            daily_loss_limit: self.daily_loss_limit,
            daily_bet_limit: self.daily_bet_limit,
            tier1_stake_pct: self.tier1_stake_pct,
            tier2_stake_pct: self.tier2_stake_pct,
            caution_stake_multiplier: self.caution_stake_multiplier,
            daily_take_profit: self.daily_take_profit,
            daily_stop_loss: self.daily_stop_loss,
        }
    }

    pub fn decision(&self) -> DecisionConfig {
        DecisionConfig {
            mode: self.decision_mode,
            dqs_threshold: self.dqs_threshold,
            fast_track_dqs: self.fast_track_dqs,
            edge_score_threshold: self.edge_score_threshold,
            secondary_minute_tolerance: self.secondary_minute_tolerance,
            secondary_kickoff_tolerance_min: self.secondary_kickoff_tolerance_min,
        }
    }

    pub fn modules(&self) -> ModuleToggles {
        ModuleToggles {
            xg: self.enable_xg,
            bayesian: self.enable_bayesian,
            league_profiles: self.enable_league_profiles,
            secondary_validation: self.secondary_url.is_some(),
        }
    }

    pub fn league_tiers(&self) -> LeagueTiers {
        let clean = |v: &[String]| {
            v.iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        };
        LeagueTiers {
            tier1: clean(&self.tier1_leagues),
            tier2: clean(&self.tier2_leagues),
        }
    }
}
