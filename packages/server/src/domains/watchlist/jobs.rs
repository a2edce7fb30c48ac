//! Watchlist job payloads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kernel::jobs::registry::job_types;

/// Re-check one watched artist's catalog and enqueue syncs for anything new.
///
/// Enqueued with `idempotency_key = artist_id`, so a scan while a previous
/// sync is still pending or running is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistSyncJob {
    pub artist_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub external_ids: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
}

impl ArtistSyncJob {
    pub const JOB_TYPE: &'static str = job_types::ARTIST_SYNC;

    pub fn idempotency_key(&self) -> String {
        self.artist_id.to_string()
    }
}

/// On-demand watchlist scan, same work as one timer tick. Produced by the
/// HTTP surface when an operator wants a scan now rather than at the next
/// interval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchlistScanJob {}

impl WatchlistScanJob {
    pub const JOB_TYPE: &'static str = job_types::WATCHLIST;
}
