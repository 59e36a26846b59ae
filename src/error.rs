use std::time::Duration;

/// Typed failure kinds of the live signal engine.
///
/// None of these is allowed to abort the ingestion loop: fetch failures are
/// counted and degrade freshness, store failures are logged, corrupt state is
/// replaced by defaults.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{source_name} timed out after {after:?}")]
    FetchTimeout { source_name: String, after: Duration },

    #[error("{source_name} fetch failed: {message}")]
    Fetch { source_name: String, message: String },

    #[error("state store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("state store lock poisoned")]
    StorePoisoned,

    #[error("stored state under '{key}' is corrupt: {message}")]
    CorruptState { key: String, message: String },

    #[error("bet rejected: {0}")]
    InvalidBet(String),

    #[error("state encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
