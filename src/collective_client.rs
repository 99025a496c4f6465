//! HTTP fetcher for the collective controller's REST API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::config::CollectiveConfig;
use crate::domain::resolver::{FetchRequest, Fetcher};
use crate::error::FetchError;

pub struct CollectiveClient {
    base_url: String,
    http: Client,
    credentials: Option<(String, Option<String>)>,
}

impl CollectiveClient {
    pub fn new(config: &CollectiveConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .context("building collective HTTP client")?;
        let base_url = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.api_prefix.trim_matches('/')
        );
        Ok(Self {
            base_url,
            http,
            credentials: config.username.clone().map(|user| (user, config.password.clone())),
        })
    }

    pub fn url_for(&self, request: &FetchRequest) -> String {
        format!("{}/{}", self.base_url, request.relative_path())
    }
}

#[async_trait]
impl Fetcher for CollectiveClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<Option<Value>, FetchError> {
        let url = self.url_for(request);
        let mut builder = self.http.get(&url);
        if let Some((user, password)) = &self.credentials {
            builder = builder.basic_auth(user, password.as_ref());
        }
        let resp = builder.send().await.map_err(|source| FetchError::Transport {
            url: url.clone(),
            source,
        })?;

        match resp.status() {
            StatusCode::NOT_FOUND => {
                debug!(url = %url, "collective returned 404");
                Ok(None)
            }
            status if !status.is_success() => Err(FetchError::Status {
                url,
                status: status.as_u16(),
            }),
            _ => resp
                .json::<Value>()
                .await
                .map(Some)
                .map_err(|e| FetchError::Decode {
                    url,
                    reason: e.to_string(),
                }),
        }
    }
}
