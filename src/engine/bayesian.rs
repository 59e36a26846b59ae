use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BayesianRefinement {
    pub prior: f64,
    pub posterior: f64,
    pub confidence: Confidence,
}

/// Refine `prior` with the edge score as evidence:
/// `posterior = L·p / (L·p + (1 − L)·(1 − p))`, L = 0.8 when evidence > 1.5
/// else 0.4. `None` when the module is disabled.
pub fn refine(prior: f64, evidence: f64, enabled: bool) -> Option<BayesianRefinement> {
    if !enabled {
        return None;
    }
    let prior = prior.clamp(0.0, 1.0);
    let likelihood = if evidence > 1.5 { 0.8 } else { 0.4 };
    let num = likelihood * prior;
    let denom = num + (1.0 - likelihood) * (1.0 - prior);
    let posterior = if denom > 0.0 { num / denom } else { prior };
    Some(BayesianRefinement {
        prior,
        posterior: (posterior * 10_000.0).round() / 10_000.0,
        confidence: if evidence > 2.0 {
            Confidence::High
        } else {
            Confidence::Medium
        },
    })
}
