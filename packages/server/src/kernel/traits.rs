// Trait definitions for external collaborators
//
// These are INFRASTRUCTURE traits only - no business logic. Domain handlers
// translate job payloads into calls on these; the orchestrator core never
// talks to a provider directly.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kernel::jobs::job::{ErrorKind, JobError};

/// Failure surface shared by all provider adapters. Maps 1:1 onto the
/// orchestrator's error kinds so handlers can classify without inspecting
/// messages.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("upstream unavailable: {0}")]
    Dependency(String),

    #[error("upstream rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid response: {0}")]
    Invalid(String),
}

impl From<ProviderError> for JobError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Dependency(msg) => JobError::new(ErrorKind::Dependency, msg),
            ProviderError::RateLimited { retry_after } => {
                let mut job_err = JobError::new(ErrorKind::RateLimited, "upstream rate limited");
                if let Some(delay) = retry_after {
                    job_err = job_err.with_meta(serde_json::json!({
                        "retry_after_ms": delay.as_millis() as u64
                    }));
                }
                job_err
            }
            ProviderError::NotFound(msg) => JobError::new(ErrorKind::NotFound, msg),
            ProviderError::Invalid(msg) => JobError::new(ErrorKind::Internal, msg),
        }
    }
}

impl ProviderError {
    /// Whether the orchestrator should back off and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Dependency(_) | ProviderError::RateLimited { .. }
        )
    }
}

// =============================================================================
// Source provider (peer-to-peer audio source)
// =============================================================================

/// Reference track a search or match runs against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRef {
    pub artist: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i32>,
}

/// Normalized candidate file from the source network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub username: String,
    pub filename: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i32>,
    #[serde(default)]
    pub free_upload_slot: bool,
    #[serde(default)]
    pub queue_length: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferState {
    Queued,
    InProgress { transferred: i64, total: i64 },
    Complete,
    Failed(String),
}

#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Search the network and return normalized candidates.
    async fn search(&self, query: &str) -> Result<Vec<Candidate>, ProviderError>;

    /// Enqueue a download of one candidate file.
    async fn download(&self, candidate: &Candidate) -> Result<(), ProviderError>;

    /// Poll the state of a previously requested download.
    async fn download_state(
        &self,
        username: &str,
        filename: &str,
    ) -> Result<TransferState, ProviderError>;
}

// =============================================================================
// Metadata provider (artist catalog)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumRef {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default)]
    pub total_tracks: i32,
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Albums in an artist's catalog, newest first.
    async fn artist_albums(&self, artist_external_id: &str) -> Result<Vec<AlbumRef>, ProviderError>;

    /// Tracks on one album.
    async fn album_tracks(&self, album_id: &str) -> Result<Vec<TrackRef>, ProviderError>;
}
