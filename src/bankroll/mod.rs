//! Bankroll manager: capital state, stake sizing, the NORMAL / CAUTION /
//! NO_BET state machine and the append-only ledger.
//!
//! Every operation runs read-modify-persist under one mutex, so a stake
//! deduction can never interleave with a mode re-evaluation.

pub mod ledger;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::config::BankrollConfig;
use crate::db::models::{Fixture, Tier};
use crate::db::StateStore;
use crate::engine::{Signal, Verdict};
use crate::error::EngineError;

pub use ledger::{Ledger, LedgerEntry, LedgerEvent, LEDGER_CAPACITY};

pub const BANKROLL_STORE_KEY: &str = "bankroll_state";

/// Global capital-risk gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Normal,
    Caution,
    NoBet,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Normal => "NORMAL",
            Mode::Caution => "CAUTION",
            Mode::NoBet => "NO_BET",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictStats {
    pub pass_count: u32,
    pub no_bet_count: u32,
    pub bet_count: u32,
}

impl VerdictStats {
    pub fn total(&self) -> u32 {
        self.pass_count + self.no_bet_count + self.bet_count
    }
}

/// Persisted singleton capital state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankrollState {
    pub starting_balance: f64,
    pub current_balance: f64,
    pub max_balance_seen: f64,
    /// Balance at the last daily reset; base for the daily P/L ratio.
    #[serde(default)]
    pub day_start_balance: f64,
    pub daily_pl: f64,
    pub win_streak: u32,
    pub loss_streak: u32,
    pub current_mode: Mode,
    pub daily_bet_count: u32,
    pub daily_loss_count: u32,
    pub last_reset_date: NaiveDate,
    pub ledger: Ledger,
    #[serde(default)]
    pub stats: VerdictStats,
    /// `fixture|verdict` keys already counted today.
    #[serde(default)]
    pub processed_today: BTreeSet<String>,
}

impl BankrollState {
    fn fresh(initial_balance: f64, today: NaiveDate) -> Self {
        BankrollState {
            starting_balance: initial_balance,
            current_balance: initial_balance,
            max_balance_seen: initial_balance,
            day_start_balance: initial_balance,
            daily_pl: 0.0,
            win_streak: 0,
            loss_streak: 0,
            current_mode: Mode::Normal,
            daily_bet_count: 0,
            daily_loss_count: 0,
            last_reset_date: today,
            ledger: Ledger::default(),
            stats: VerdictStats::default(),
            processed_today: BTreeSet::new(),
        }
    }

    /// Daily P/L relative to the balance the day started with.
    pub fn daily_pl_ratio(&self) -> f64 {
        let base = if self.day_start_balance > 0.0 {
            self.day_start_balance
        } else {
            self.starting_balance
        };
        if base > 0.0 {
            self.daily_pl / base
        } else {
            0.0
        }
    }

    fn append(&mut self, event: LedgerEvent, now: DateTime<Utc>) {
        let entry = LedgerEntry::new(event, now, self.current_balance, self.current_mode);
        self.ledger.append(entry);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankrollAnalytics {
    /// Percentages of all verdicts logged.
    pub pass_rate: f64,
    pub no_bet_rate: f64,
    pub bet_rate: f64,
    pub total_analysed: u32,
    pub net_profit: f64,
    /// Fraction below the highest balance seen.
    pub drawdown: f64,
    pub mode: Mode,
}

/// Source of the current time; injectable so day boundaries can be tested.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct BankrollManager {
    cfg: BankrollConfig,
    state: Mutex<BankrollState>,
    store: Arc<dyn StateStore>,
    clock: Clock,
}

impl BankrollManager {
    pub fn load(cfg: BankrollConfig, store: Arc<dyn StateStore>) -> Self {
        Self::with_clock(cfg, store, Arc::new(Utc::now))
    }

    /// Restore the persisted state, or start fresh with a SYSTEM_INIT entry
    /// when it is absent or unreadable.
    pub fn with_clock(cfg: BankrollConfig, store: Arc<dyn StateStore>, clock: Clock) -> Self {
        let now = clock();
        let restored = match store.load(BANKROLL_STORE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<BankrollState>(&raw) {
                Ok(state) => Some(state),
                Err(e) => {
                    let err = EngineError::CorruptState {
                        key: BANKROLL_STORE_KEY.to_string(),
                        message: e.to_string(),
                    };
                    error!("{}; reinitialising bankroll", err);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                error!("Failed to load bankroll state: {}; reinitialising", e);
                None
            }
        };

        let state = match restored {
            Some(state) => {
                info!(
                    "Bankroll restored: balance {:.2}, mode {}, {} ledger entries",
                    state.current_balance,
                    state.current_mode,
                    state.ledger.len()
                );
                state
            }
            None => {
                let mut state = BankrollState::fresh(cfg.initial_balance, now.date_naive());
                state.append(
                    LedgerEvent::SystemInit {
                        balance: cfg.initial_balance,
                    },
                    now,
                );
                info!("Bankroll initialised with {:.2}", cfg.initial_balance);
                state
            }
        };

        let manager = BankrollManager {
            cfg,
            state: Mutex::new(state),
            store,
            clock,
        };
        {
            let state = manager.lock();
            manager.persist(&state);
        }
        manager
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Lock the state, applying the daily reset first when the calendar date
    /// changed since the last access.
    fn lock(&self) -> MutexGuard<'_, BankrollState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if self.roll_day(&mut state, self.now()) {
            self.persist(&state);
        }
        state
    }

    fn roll_day(&self, state: &mut BankrollState, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if state.last_reset_date == today {
            return false;
        }
        info!(
            "New day {}: resetting daily counters (P/L {:.2}, bets {}, losses {})",
            today, state.daily_pl, state.daily_bet_count, state.daily_loss_count
        );
        state.daily_pl = 0.0;
        state.daily_bet_count = 0;
        state.daily_loss_count = 0;
        state.processed_today.clear();
        state.day_start_balance = state.current_balance;
        state.last_reset_date = today;
        state.append(
            LedgerEvent::SystemReset {
                reason: "new day started".to_string(),
            },
            now,
        );
        self.check_mode_transitions(state, now);
        true
    }

    /// Mode implied by the current counters, with the rule that triggered it.
    fn target_mode(&self, state: &BankrollState) -> (Mode, String) {
        let cfg = &self.cfg;
        let ratio = state.daily_pl_ratio();
        if state.loss_streak >= cfg.stop_loss_streak {
            (Mode::NoBet, format!("loss streak {}", state.loss_streak))
        } else if state.daily_loss_count >= cfg.daily_loss_limit {
            (Mode::NoBet, format!("daily loss limit {}", state.daily_loss_count))
        } else if state.daily_bet_count >= cfg.daily_bet_limit {
            (Mode::NoBet, format!("daily bet limit {}", state.daily_bet_count))
        } else if ratio >= cfg.daily_take_profit {
            (Mode::NoBet, format!("daily take-profit {:+.2}%", ratio * 100.0))
        } else if ratio <= cfg.daily_stop_loss {
            (Mode::NoBet, format!("daily stop-loss {:+.2}%", ratio * 100.0))
        } else if state.loss_streak >= cfg.caution_loss_streak {
            (Mode::Caution, format!("loss streak {}", state.loss_streak))
        } else {
            (Mode::Normal, "limits clear".to_string())
        }
    }

    fn check_mode_transitions(&self, state: &mut BankrollState, now: DateTime<Utc>) {
        let (to, reason) = self.target_mode(state);
        let from = state.current_mode;
        if to == from {
            return;
        }
        state.current_mode = to;
        warn!("Bankroll mode {} -> {} ({})", from, to, reason);
        state.append(LedgerEvent::ModeChange { from, to, reason }, now);
    }

    fn persist(&self, state: &BankrollState) {
        let result = serde_json::to_string(state)
            .map_err(EngineError::from)
            .and_then(|raw| self.store.save(BANKROLL_STORE_KEY, &raw));
        if let Err(e) = result {
            error!("Failed to persist bankroll state: {}", e);
        }
    }

    /// Apply the daily reset if the date changed. Called once per ingestion
    /// cycle; returns true when a reset happened.
    pub fn refresh_day(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let reset = self.roll_day(&mut state, self.now());
        if reset {
            self.persist(&state);
        }
        reset
    }

    pub fn mode(&self) -> Mode {
        self.lock().current_mode
    }

    pub fn snapshot(&self) -> BankrollState {
        self.lock().clone()
    }

    /// Recommended stake for a BET signal.
    ///
    /// `balance × tier percentage`, halved (by the caution multiplier) in
    /// CAUTION mode and rounded to cents. Zero in NO_BET mode, for tier-3
    /// fixtures and for any verdict other than BET.
    pub fn calculate_recommended_stake(&self, fixture: &Fixture, signal: &Signal) -> f64 {
        let state = self.lock();
        if state.current_mode == Mode::NoBet || signal.verdict != Verdict::Bet {
            return 0.0;
        }
        let mut pct = match fixture.tier {
            Tier::Top => self.cfg.tier1_stake_pct,
            Tier::Second => self.cfg.tier2_stake_pct,
            Tier::Discovery => return 0.0,
        };
        if state.current_mode == Mode::Caution {
            pct *= self.cfg.caution_stake_multiplier;
        }
        ((state.current_balance * pct) * 100.0).round() / 100.0
    }

    /// Commit `stake` to a bet: deducted from the balance immediately with a
    /// BET_OPEN entry. Returns false without side effects in NO_BET mode or
    /// when the stake is not a positive amount within the balance.
    pub fn approve_bet(&self, fixture: &Fixture, signal: &Signal, stake: f64) -> bool {
        let mut state = self.lock();
        if state.current_mode == Mode::NoBet {
            warn!("Bet on {} rejected: bankroll in NO_BET mode", fixture.id());
            return false;
        }
        if !stake.is_finite() || stake <= 0.0 || stake > state.current_balance {
            warn!(
                "Bet on {} rejected: stake {:.2} outside balance {:.2}",
                fixture.id(),
                stake,
                state.current_balance
            );
            return false;
        }
        let now = self.now();
        let balance_before = state.current_balance;
        state.current_balance -= stake;
        state.append(
            LedgerEvent::BetOpen {
                match_id: fixture.id().to_string(),
                match_name: fixture.feed.match_name(),
                league: fixture.feed.league_name.clone(),
                tier: fixture.tier,
                stake_amount: stake,
                balance_before,
                reason: signal.reason.clone(),
            },
            now,
        );
        info!(
            "BET_OPEN {} ({}) stake {:.2}, balance {:.2} -> {:.2}",
            fixture.id(),
            fixture.feed.match_name(),
            stake,
            balance_before,
            state.current_balance
        );
        self.persist(&state);
        true
    }

    /// Settle a bet opened with `stake`.
    ///
    /// # Arguments
    /// * `is_win` – A win credits `stake × odds`; the stake itself was already
    ///              deducted at open, so a loss credits nothing.
    /// * `odds`   – Decimal odds (≥ 1.0).
    ///
    /// Updates streaks and daily counters, then re-evaluates the mode.
    pub fn process_result(
        &self,
        match_id: &str,
        is_win: bool,
        stake: f64,
        odds: f64,
    ) -> Result<BankrollState, EngineError> {
        if !stake.is_finite() || stake <= 0.0 {
            return Err(EngineError::InvalidBet(format!("stake {} must be positive", stake)));
        }
        if !odds.is_finite() || odds < 1.0 {
            return Err(EngineError::InvalidBet(format!("odds {} must be at least 1.0", odds)));
        }

        let mut state = self.lock();
        let now = self.now();
        let balance_before = state.current_balance;
        state.daily_bet_count += 1;

        if is_win {
            let payout = stake * odds;
            let profit = payout - stake;
            state.current_balance += payout;
            state.max_balance_seen = state.max_balance_seen.max(state.current_balance);
            state.daily_pl += profit;
            state.win_streak += 1;
            state.loss_streak = 0;
            let win_streak = state.win_streak;
            state.append(
                LedgerEvent::BetWin {
                    match_id: match_id.to_string(),
                    stake,
                    odds,
                    payout,
                    profit,
                    balance_before,
                    win_streak,
                },
                now,
            );
            info!(
                "BET_WIN {} payout {:.2}, balance {:.2} -> {:.2}",
                match_id, payout, balance_before, state.current_balance
            );
        } else {
            state.daily_pl -= stake;
            state.loss_streak += 1;
            state.win_streak = 0;
            state.daily_loss_count += 1;
            let loss_streak = state.loss_streak;
            state.append(
                LedgerEvent::BetLoss {
                    match_id: match_id.to_string(),
                    stake,
                    profit: -stake,
                    balance_before,
                    loss_streak,
                },
                now,
            );
            info!(
                "BET_LOSS {} stake {:.2}, loss streak {}",
                match_id, stake, loss_streak
            );
        }

        self.check_mode_transitions(&mut state, now);
        self.persist(&state);
        Ok(state.clone())
    }

    /// Count a verdict once per (fixture, verdict) per day. Returns true when
    /// it was counted.
    pub fn log_verdict(&self, fixture_id: &str, verdict: Verdict) -> bool {
        let mut state = self.lock();
        let key = format!("{}|{}", fixture_id, verdict.as_str());
        if !state.processed_today.insert(key) {
            return false;
        }
        match verdict {
            Verdict::Pass => state.stats.pass_count += 1,
            Verdict::NoBet => state.stats.no_bet_count += 1,
            Verdict::Bet => state.stats.bet_count += 1,
        }
        self.persist(&state);
        true
    }

    pub fn analytics(&self) -> BankrollAnalytics {
        let state = self.lock();
        let total = state.stats.total();
        let rate = |n: u32| {
            if total > 0 {
                n as f64 / total as f64 * 100.0
            } else {
                0.0
            }
        };
        let drawdown = if state.max_balance_seen > 0.0 {
            (state.max_balance_seen - state.current_balance) / state.max_balance_seen
        } else {
            0.0
        };
        BankrollAnalytics {
            pass_rate: rate(state.stats.pass_count),
            no_bet_rate: rate(state.stats.no_bet_count),
            bet_rate: rate(state.stats.bet_count),
            total_analysed: total,
            net_profit: state.current_balance - state.starting_balance,
            drawdown,
            mode: state.current_mode,
        }
    }

    /// Up to `limit` most recent ledger entries, newest first.
    pub fn ledger(&self, limit: usize) -> Vec<LedgerEntry> {
        self.lock().ledger.recent(limit)
    }

    /// Discard all capital history and start over from the initial balance.
    pub fn reset(&self) -> BankrollState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.now();
        warn!(
            "Bankroll reset: discarding balance {:.2} and {} ledger entries",
            state.current_balance,
            state.ledger.len()
        );
        *state = BankrollState::fresh(self.cfg.initial_balance, now.date_naive());
        state.append(
            LedgerEvent::SystemInit {
                balance: self.cfg.initial_balance,
            },
            now,
        );
        self.persist(&state);
        state.clone()
    }
}
