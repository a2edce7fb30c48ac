//! Server dependencies for job handlers (using traits for testability)
//!
//! Central dependency container handed to every handler invocation. All
//! external services sit behind trait objects so tests can swap in mocks and
//! a manual clock.

use std::sync::Arc;
use std::time::Duration;

use crate::domains::watchlist::store::{MemoryWatchedArtistStore, WatchedArtistStore};
use crate::kernel::clock::{Clock, FixedJitter, Jitter, ManualClock, SharedClock, SharedJitter};
use crate::kernel::events::{CapturingEventSink, EventSink};
use crate::kernel::jobs::memory::MemoryQueueStore;
use crate::kernel::jobs::queue::QueueStore;
use crate::kernel::test_dependencies::{MockMetadataProvider, MockSourceProvider};
use crate::kernel::traits::{MetadataProvider, SourceProvider};

/// Watchlist scheduling knobs the artist-sync handler needs at runtime.
#[derive(Debug, Clone)]
pub struct WatchlistPolicy {
    /// Cooldown applied when an artist's retry budget runs out.
    pub cooldown: Duration,
    /// Retries allowed before the cooldown kicks in.
    pub retry_budget_per_artist: i32,
    /// Max artists a scan may enqueue in one pass.
    pub max_per_tick: usize,
    /// Work deadline for one scan pass.
    pub tick_budget: Duration,
}

impl Default for WatchlistPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(3600),
            retry_budget_per_artist: 3,
            max_per_tick: 50,
            tick_budget: Duration::from_secs(8),
        }
    }
}

/// Dependencies accessible to handlers.
#[derive(Clone)]
pub struct ServerDeps {
    pub queue: Arc<dyn QueueStore>,
    pub artists: Arc<dyn WatchedArtistStore>,
    pub source: Arc<dyn SourceProvider>,
    pub metadata: Arc<dyn MetadataProvider>,
    pub clock: SharedClock,
    pub jitter: SharedJitter,
    pub events: Arc<dyn EventSink>,
    pub watchlist_policy: WatchlistPolicy,
}

impl ServerDeps {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn QueueStore>,
        artists: Arc<dyn WatchedArtistStore>,
        source: Arc<dyn SourceProvider>,
        metadata: Arc<dyn MetadataProvider>,
        clock: SharedClock,
        jitter: SharedJitter,
        events: Arc<dyn EventSink>,
        watchlist_policy: WatchlistPolicy,
    ) -> Self {
        Self {
            queue,
            artists,
            source,
            metadata,
            clock,
            jitter,
            events,
            watchlist_policy,
        }
    }

    /// Fully in-memory dependency set: manual clock, fixed jitter, mock
    /// providers, capturing event sink. The backbone of the test suites.
    pub fn for_tests() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(chrono::Utc::now()));
        let jitter: Arc<dyn Jitter> = Arc::new(FixedJitter(0.0));
        Self {
            queue: Arc::new(MemoryQueueStore::new(clock.clone())),
            artists: Arc::new(MemoryWatchedArtistStore::new()),
            source: Arc::new(MockSourceProvider::new()),
            metadata: Arc::new(MockMetadataProvider::new()),
            clock,
            jitter,
            events: Arc::new(CapturingEventSink::new()),
            watchlist_policy: WatchlistPolicy::default(),
        }
    }
}
