use anyhow::Result;
use async_trait::async_trait;

use crate::db::models::{FeedFixture, SecondaryFixture};

/// Source of canonical fixtures (the fixture normalizer).
#[async_trait]
pub trait FixtureSource: Send + Sync {
    /// Light list-level snapshot of every fixture currently live.
    async fn fetch_live_fixtures(&self) -> Result<Vec<FeedFixture>>;

    /// Full detail for one fixture. `Ok(None)` when the source no longer
    /// knows the id.
    async fn fetch_fixture_detail(&self, id: &str) -> Result<Option<FeedFixture>>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Independent feed used only for cross-validation.
#[async_trait]
pub trait SecondarySource: Send + Sync {
    async fn fetch_fixtures(&self) -> Result<Vec<SecondaryFixture>>;

    fn name(&self) -> &str;
}
