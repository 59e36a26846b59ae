use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::db::models::Snapshot;

/// Snapshots kept per fixture.
pub const HISTORY_CAPACITY: usize = 10;

/// Rolling per-fixture window of snapshots, most recent first.
///
/// `snapshots[0]` is always the newest capture and timestamps never increase
/// towards the back; the oldest entry is evicted once the window is full.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryBuffer {
    snapshots: VecDeque<Snapshot>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        HistoryBuffer {
            snapshots: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Record a new snapshot at the front. A timestamp older than the current
    /// head (clock step backwards) is raised to the head's timestamp.
    pub fn push(&mut self, mut snapshot: Snapshot) {
        if let Some(head) = self.snapshots.front() {
            if snapshot.timestamp < head.timestamp {
                snapshot.timestamp = head.timestamp;
            }
        }
        self.snapshots.push_front(snapshot);
        self.snapshots.truncate(HISTORY_CAPACITY);
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.front()
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    /// First snapshot at least `window` older than the latest one, or the
    /// oldest available when none is old enough.
    pub fn lookback(&self, window: Duration) -> Option<&Snapshot> {
        let latest = self.latest()?;
        self.snapshots
            .iter()
            .find(|s| latest.timestamp - s.timestamp >= window)
            .or_else(|| self.oldest())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::models::{MatchStats, Minute, Score};
    use chrono::{DateTime, TimeZone, Utc};

    pub(crate) fn snapshot_at(ts: DateTime<Utc>, stats: MatchStats) -> Snapshot {
        Snapshot {
            timestamp: ts,
            dqs: 0.8,
            minute: Minute::Elapsed(50),
            score: Score::default(),
            stats,
            latency_ms: 1000,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 28, 18, 0, 0).unwrap()
    }

    #[test]
    fn capacity_is_bounded_and_newest_first() {
        let mut h = HistoryBuffer::new();
        for i in 0..25 {
            h.push(snapshot_at(t0() + Duration::seconds(i * 10), MatchStats::default()));
        }
        assert_eq!(h.len(), HISTORY_CAPACITY);
        assert_eq!(h.latest().unwrap().timestamp, t0() + Duration::seconds(240));
        let ts: Vec<_> = h.iter().map(|s| s.timestamp).collect();
        assert!(ts.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(h.oldest().unwrap().timestamp, t0() + Duration::seconds(150));
    }

    #[test]
    fn backwards_clock_keeps_order() {
        let mut h = HistoryBuffer::new();
        h.push(snapshot_at(t0(), MatchStats::default()));
        h.push(snapshot_at(t0() - Duration::seconds(30), MatchStats::default()));
        let ts: Vec<_> = h.iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![t0(), t0()]);
    }

    #[test]
    fn lookback_falls_back_to_oldest() {
        let mut h = HistoryBuffer::new();
        h.push(snapshot_at(t0(), MatchStats::default()));
        h.push(snapshot_at(t0() + Duration::minutes(4), MatchStats::default()));
        h.push(snapshot_at(t0() + Duration::minutes(12), MatchStats::default()));

        let back = h.lookback(Duration::minutes(10)).unwrap();
        assert_eq!(back.timestamp, t0());

        let back = h.lookback(Duration::minutes(8)).unwrap();
        assert_eq!(back.timestamp, t0() + Duration::minutes(4));

        let back = h.lookback(Duration::minutes(30)).unwrap();
        assert_eq!(back.timestamp, t0());
    }
}
