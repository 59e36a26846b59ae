pub mod bayesian;
pub mod decision;
pub mod discovery;
pub mod dqs;
pub mod league;
pub mod momentum;
pub mod reason;
pub mod risk;
pub mod validator;
pub mod xg;

pub use decision::{DecisionEngine, Signal, Verdict};
pub use reason::ReasonKind;
