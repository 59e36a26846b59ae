use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::db::models::{FeedFixture, SecondaryFixture};

use super::provider::{FixtureSource, SecondarySource};

/// List endpoints answer either a bare array or `{"fixtures": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Bare(Vec<T>),
    Wrapped { fixtures: Vec<T> },
}

impl<T> ListResponse<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListResponse::Bare(v) => v,
            ListResponse::Wrapped { fixtures } => fixtures,
        }
    }
}

/// Decode every list entry on its own so one malformed entry only costs
/// itself. Rejected entries are logged with their position.
fn decode_entries<T: DeserializeOwned>(source: &str, raw: ListResponse<serde_json::Value>) -> Vec<T> {
    let entries = raw.into_vec();
    let total = entries.len();
    let decoded: Vec<T> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("{}: skipping malformed list entry #{}: {}", source, i, e);
                None
            }
        })
        .collect();
    if decoded.len() < total {
        warn!(
            "{}: decoded {} of {} list entries",
            source,
            decoded.len(),
            total
        );
    }
    decoded
}

fn base_url(raw: &str) -> Result<Url> {
    let mut raw = raw.trim().to_string();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw).with_context(|| format!("Invalid base URL '{}'", raw))
}

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Client for the fixture normalizer's canonical JSON API:
/// `GET {base}live` and `GET {base}fixtures/{id}`.
pub struct NormalizerClient {
    http: Client,
    base_url: Url,
}

impl NormalizerClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        Ok(NormalizerClient {
            http: http_client(timeout)?,
            base_url: base_url(base)?,
        })
    }
}

#[async_trait]
impl FixtureSource for NormalizerClient {
    fn name(&self) -> &str {
        "normalizer"
    }

    async fn fetch_live_fixtures(&self) -> Result<Vec<FeedFixture>> {
        let url = self.base_url.join("live")?;
        debug!("Fetching live fixtures from {}", url);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("Normalizer request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("Normalizer error: {}", resp.status());
        }
        let list: ListResponse<serde_json::Value> = resp
            .json()
            .await
            .context("Normalizer fixture list is not a JSON array")?;
        Ok(decode_entries(self.name(), list))
    }

    async fn fetch_fixture_detail(&self, id: &str) -> Result<Option<FeedFixture>> {
        let mut url = self.base_url.join("fixtures/")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Normalizer base URL cannot hold a path"))?
            .pop_if_empty()
            .push(id);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Normalizer detail request for {} failed", id))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            anyhow::bail!("Normalizer detail error for {}: {}", id, resp.status());
        }
        let fixture: FeedFixture = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse normalizer detail for {}", id))?;
        Ok(Some(fixture))
    }
}

/// Client for the secondary validation feed: `GET {base}live`.
pub struct SecondaryClient {
    http: Client,
    base_url: Url,
}

impl SecondaryClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        Ok(SecondaryClient {
            http: http_client(timeout)?,
            base_url: base_url(base)?,
        })
    }
}

#[async_trait]
impl SecondarySource for SecondaryClient {
    fn name(&self) -> &str {
        "secondary"
    }

    async fn fetch_fixtures(&self) -> Result<Vec<SecondaryFixture>> {
        let url = self.base_url.join("live")?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("Secondary source request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("Secondary source error: {}", resp.status());
        }
        let list: ListResponse<serde_json::Value> = resp
            .json()
            .await
            .context("Secondary fixture list is not a JSON array")?;
        Ok(decode_entries(self.name(), list))
    }
}
