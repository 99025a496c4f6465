//! Typed HTTP client for the collective-graph daemon REST API.

use anyhow::{bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::domain::event::ChangeEvent;
use crate::domain::service::ServiceHealth;

pub struct DaemonClient {
    base_url: String,
    http: Client,
}

impl DaemonClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn health(&self) -> Result<ServiceHealth> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;
        if !resp.status().is_success() {
            bail!("{} returned {}", url, resp.status());
        }
        resp.json()
            .await
            .with_context(|| format!("parsing response from {}", url))
    }

    /// Snapshot of the resource at `path`, or `None` if it does not resolve.
    /// Segments are sent as given, so ids containing `/` must arrive encoded.
    pub async fn resource(&self, path: &str) -> Result<Option<Value>> {
        let url = format!("{}/api/v1/resources/{}", self.base_url, path.trim_matches('/'));
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("{} returned {}", url, resp.status());
        }
        resp.json()
            .await
            .map(Some)
            .with_context(|| format!("parsing response from {}", url))
    }

    /// Post events; returns how many matched a loaded resource.
    pub async fn apply_events(&self, events: &[ChangeEvent]) -> Result<usize> {
        let url = format!("{}/api/v1/events", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(events)
            .send()
            .await
            .with_context(|| format!("POST {}", url))?;

        if !resp.status().is_success() {
            bail!("{} returned {}", url, resp.status());
        }
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("parsing response from {}", url))?;
        body.get("applied")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .with_context(|| format!("{} returned no applied count", url))
    }
}
