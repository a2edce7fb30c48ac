//! Watchlist domain: watched artists, their schedule state, and the
//! `artist_sync` pipeline.

pub mod handlers;
pub mod jobs;
pub mod model;
pub mod store;

pub use handlers::register_watchlist_jobs;
pub use jobs::{ArtistSyncJob, WatchlistScanJob};
pub use model::{FailureBudget, WatchedArtist};
pub use store::{MemoryWatchedArtistStore, PostgresWatchedArtistStore, WatchedArtistStore};
