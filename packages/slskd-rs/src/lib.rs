//! Minimal HTTP client for the slskd daemon.
//!
//! Covers the handful of endpoints Harmony needs: start a search, read the
//! collected peer responses, enqueue downloads and poll transfer state.
//! Authentication uses the daemon's static API key header.

use std::time::Duration;

pub mod models;

use reqwest::{header, Client, StatusCode};
use serde_json::json;
use thiserror::Error;

use crate::models::{DownloadRequest, PeerResponse, SearchResponse, Transfer};

#[derive(Debug, Error)]
pub enum SlskdError {
    #[error("slskd request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("slskd returned {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("slskd rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("resource not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone)]
pub struct SlskdOptions {
    pub base_url: String,
    pub api_key: String,
    /// Per-request timeout. The orchestrator layers its own deadline on top.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SlskdClient {
    options: SlskdOptions,
    client: Client,
}

impl SlskdClient {
    pub fn new(options: SlskdOptions) -> Result<Self, SlskdError> {
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self { options, client })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/api/v0/{}",
            self.options.base_url.trim_end_matches('/'),
            path
        )
    }

    fn headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        if let Ok(value) = self.options.api_key.parse() {
            headers.insert("X-API-Key", value);
        }
        headers
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SlskdError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(SlskdError::RateLimited { retry_after });
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(SlskdError::NotFound(body));
        }
        Err(SlskdError::Api { status, body })
    }

    /// Start a search on the peer network. The daemon collects responses
    /// asynchronously; poll [`Self::search_responses`] afterwards.
    pub async fn start_search(&self, search_text: &str) -> Result<SearchResponse, SlskdError> {
        let response = self
            .client
            .post(self.url("searches"))
            .headers(self.headers())
            .json(&json!({ "searchText": search_text }))
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    /// Fetch the peer responses collected so far for a search.
    pub async fn search_responses(&self, search_id: &str) -> Result<Vec<PeerResponse>, SlskdError> {
        let response = self
            .client
            .get(self.url(&format!("searches/{search_id}/responses")))
            .headers(self.headers())
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    /// Enqueue downloads of the given files from one peer.
    pub async fn enqueue_downloads(
        &self,
        username: &str,
        files: &[DownloadRequest],
    ) -> Result<(), SlskdError> {
        let response = self
            .client
            .post(self.url(&format!("transfers/downloads/{username}")))
            .headers(self.headers())
            .json(files)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    /// All downloads requested from one peer, newest state included.
    pub async fn downloads(&self, username: &str) -> Result<Vec<Transfer>, SlskdError> {
        let response = self
            .client
            .get(self.url(&format!("transfers/downloads/{username}")))
            .headers(self.headers())
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }
}
