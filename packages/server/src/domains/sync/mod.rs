//! Sync domain: track downloads from the source network.

pub mod handlers;
pub mod jobs;

pub use handlers::register_sync_jobs;
pub use jobs::{RetryDownloadJob, SyncDownloadJob};
