use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of reasons a signal can carry. Serialized as the stable key;
/// display text is resolved separately through `Display`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    BankrollStop,
    LowDqs,
    DiscoveryOnly,
    FastTrack,
    DqsApproved,
    RiskClear,
    DeadMatch,
    NoMomentum,
    LateGame,
    NoEdge,
    SourceMismatch,
}

impl ReasonKind {
    pub fn key(&self) -> &'static str {
        match self {
            ReasonKind::BankrollStop => "bankroll_stop",
            ReasonKind::LowDqs => "low_dqs",
            ReasonKind::DiscoveryOnly => "discovery_only",
            ReasonKind::FastTrack => "fast_track",
            ReasonKind::DqsApproved => "dqs_approved",
            ReasonKind::RiskClear => "risk_clear",
            ReasonKind::DeadMatch => "dead_match",
            ReasonKind::NoMomentum => "no_momentum",
            ReasonKind::LateGame => "late_game",
            ReasonKind::NoEdge => "no_edge",
            ReasonKind::SourceMismatch => "source_mismatch",
        }
    }
}

impl fmt::Display for ReasonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReasonKind::BankrollStop => "Bankroll stop (NO_BET mode)",
            ReasonKind::LowDqs => "Low data quality",
            ReasonKind::DiscoveryOnly => "Tier 3: discovery only",
            ReasonKind::FastTrack => "Tier 1 fast-track",
            ReasonKind::DqsApproved => "DQS approved",
            ReasonKind::RiskClear => "DQS and risk filters OK",
            ReasonKind::DeadMatch => "Dead match",
            ReasonKind::NoMomentum => "No recent shots on target",
            ReasonKind::LateGame => "Late game ban",
            ReasonKind::NoEdge => "Edge score below threshold",
            ReasonKind::SourceMismatch => "Secondary source disagrees",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_form_is_the_key() {
        for kind in [
            ReasonKind::BankrollStop,
            ReasonKind::LowDqs,
            ReasonKind::DiscoveryOnly,
            ReasonKind::FastTrack,
            ReasonKind::DqsApproved,
            ReasonKind::RiskClear,
            ReasonKind::DeadMatch,
            ReasonKind::NoMomentum,
            ReasonKind::LateGame,
            ReasonKind::NoEdge,
            ReasonKind::SourceMismatch,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.key()));
        }
    }
}
