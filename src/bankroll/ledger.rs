use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::db::models::Tier;

use super::Mode;

/// Entries retained; older ones are evicted first.
pub const LEDGER_CAPACITY: usize = 500;

/// Type-specific payload of a ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEvent {
    SystemInit {
        balance: f64,
    },
    SystemReset {
        reason: String,
    },
    BetOpen {
        match_id: String,
        match_name: String,
        league: String,
        tier: Tier,
        stake_amount: f64,
        balance_before: f64,
        reason: String,
    },
    BetWin {
        match_id: String,
        stake: f64,
        odds: f64,
        payout: f64,
        profit: f64,
        balance_before: f64,
        win_streak: u32,
    },
    BetLoss {
        match_id: String,
        stake: f64,
        profit: f64,
        balance_before: f64,
        loss_streak: u32,
    },
    ModeChange {
        from: Mode,
        to: Mode,
        reason: String,
    },
}

/// Immutable capital event. Never edited once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LedgerEvent,
    pub balance_after: f64,
    pub mode: Mode,
}

impl LedgerEntry {
    pub fn new(event: LedgerEvent, timestamp: DateTime<Utc>, balance_after: f64, mode: Mode) -> Self {
        LedgerEntry {
            id: entry_id(timestamp),
            timestamp,
            event,
            balance_after,
            mode,
        }
    }
}

/// Millisecond timestamp plus a random suffix.
fn entry_id(ts: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}{:08x}", ts.timestamp_millis(), suffix)
}

/// Append-only, capacity-bounded audit log of capital events, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    entries: VecDeque<LedgerEntry>,
}

impl Ledger {
    pub fn append(&mut self, entry: LedgerEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > LEDGER_CAPACITY {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LedgerEntry> {
        self.entries.back()
    }

    /// Up to `limit` most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<LedgerEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}
