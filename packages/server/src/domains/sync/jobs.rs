//! Sync job payloads.

use serde::{Deserialize, Serialize};

use crate::kernel::jobs::registry::job_types;
use crate::kernel::traits::Candidate;

/// Find and download one track from the source network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDownloadJob {
    pub artist: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i32>,
}

impl SyncDownloadJob {
    pub const JOB_TYPE: &'static str = job_types::SYNC;

    pub fn search_query(&self) -> String {
        format!("{} {}", self.artist, self.title)
    }
}

/// Watch a previously requested transfer until it completes, restarting it
/// when the peer dropped it. Enqueued by the sync handler after a download
/// is requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDownloadJob {
    pub candidate: Candidate,
}

impl RetryDownloadJob {
    pub const JOB_TYPE: &'static str = job_types::RETRY;

    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.candidate.username, self.candidate.filename)
    }
}
