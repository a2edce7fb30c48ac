use serde::{Deserialize, Serialize};

/// A search started on the slskd daemon.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub id: String,
    pub search_text: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub file_count: i64,
    #[serde(default)]
    pub response_count: i64,
}

/// One peer's answer to a search, carrying the files it can serve.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerResponse {
    pub username: String,
    #[serde(default)]
    pub has_free_upload_slot: bool,
    #[serde(default)]
    pub upload_speed: i64,
    #[serde(default)]
    pub queue_length: i64,
    #[serde(default)]
    pub files: Vec<SharedFile>,
}

/// A single file offered by a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedFile {
    pub filename: String,
    pub size: i64,
    #[serde(default)]
    pub bit_rate: Option<i32>,
    #[serde(default)]
    pub sample_rate: Option<i32>,
    #[serde(default)]
    pub bit_depth: Option<i32>,
    #[serde(default)]
    pub length: Option<i32>,
    #[serde(default)]
    pub extension: Option<String>,
}

/// Request body for enqueueing a download on the daemon.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub filename: String,
    pub size: i64,
}

/// State of a transfer as reported by the daemon.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: String,
    pub username: String,
    pub filename: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub bytes_transferred: i64,
    #[serde(default)]
    pub size: i64,
}

impl Transfer {
    /// Terminal states the daemon reports once a transfer stops moving.
    pub fn is_complete(&self) -> bool {
        self.state.contains("Completed") && self.state.contains("Succeeded")
    }

    pub fn is_failed(&self) -> bool {
        self.state.contains("Completed") && !self.state.contains("Succeeded")
    }
}
