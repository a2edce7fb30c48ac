//! Watchlist timer scenarios: tick budgets, idempotent enqueues, cooldown
//! scheduling.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use harmony_core::domains::watchlist::{
    MemoryWatchedArtistStore, WatchedArtist, WatchedArtistStore,
};
use harmony_core::kernel::clock::{Clock, ManualClock, SharedClock};
use harmony_core::kernel::events::{names, CapturingEventSink};
use harmony_core::kernel::jobs::watchlist::{WatchlistConfig, WatchlistTimer};
use harmony_core::kernel::jobs::{JobState, MemoryQueueStore, QueueStore};

struct Fixture {
    clock: Arc<ManualClock>,
    shared_clock: SharedClock,
    artists: Arc<MemoryWatchedArtistStore>,
    queue: Arc<MemoryQueueStore>,
    sink: Arc<CapturingEventSink>,
}

impl Fixture {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let shared_clock: SharedClock = clock.clone();
        Self {
            queue: Arc::new(MemoryQueueStore::new(shared_clock.clone())),
            artists: Arc::new(MemoryWatchedArtistStore::new()),
            sink: Arc::new(CapturingEventSink::new()),
            clock,
            shared_clock,
        }
    }

    fn timer(&self, config: WatchlistConfig) -> WatchlistTimer {
        WatchlistTimer::new(
            self.artists.clone(),
            self.queue.clone(),
            self.shared_clock.clone(),
            self.sink.clone(),
            config,
            CancellationToken::new(),
        )
    }

    async fn add_artist(&self, priority: i32) -> Uuid {
        let artist_id = Uuid::new_v4();
        self.artists
            .upsert(
                WatchedArtist::builder()
                    .artist_id(artist_id)
                    .name(format!("artist-{artist_id}"))
                    .external_ids(serde_json::json!({"spotify": artist_id.to_string()}))
                    .priority(priority)
                    .interval(Duration::from_secs(900))
                    .next_check_at(self.clock.now())
                    .retry_budget_remaining(3)
                    .build(),
            )
            .await
            .unwrap();
        artist_id
    }

    async fn artist_sync_jobs(&self) -> i64 {
        self.queue
            .counts()
            .await
            .unwrap()
            .iter()
            .filter(|c| c.job_type == "artist_sync")
            .map(|c| c.count)
            .sum()
    }
}

#[tokio::test]
async fn tick_enqueues_at_most_max_per_tick() {
    let f = Fixture::new();
    for _ in 0..200 {
        f.add_artist(0).await;
    }

    let timer = f.timer(WatchlistConfig {
        interval: Duration::from_secs(900),
        tick_budget: Duration::from_millis(100),
        max_per_tick: 20,
    });

    let summary = timer.tick().await;
    assert_eq!(summary.enqueued, 20);
    assert_eq!(summary.deferred, 0);
    assert_eq!(f.artist_sync_jobs().await, 20);

    // Only the enqueued artists moved their schedule; 180 remain due.
    let still_due = f
        .artists
        .list_due(f.clock.now(), 1000)
        .await
        .unwrap()
        .len();
    assert_eq!(still_due, 180);

    assert_eq!(f.sink.count(names::TIMER_TICK, "ok"), 1);
}

#[tokio::test]
async fn remaining_artists_are_picked_up_by_later_ticks() {
    let f = Fixture::new();
    for _ in 0..45 {
        f.add_artist(0).await;
    }

    let timer = f.timer(WatchlistConfig {
        interval: Duration::from_secs(900),
        tick_budget: Duration::from_secs(8),
        max_per_tick: 20,
    });

    assert_eq!(timer.tick().await.enqueued, 20);
    assert_eq!(timer.tick().await.enqueued, 20);
    assert_eq!(timer.tick().await.enqueued, 5);
    assert_eq!(timer.tick().await.enqueued, 0);

    assert_eq!(f.artist_sync_jobs().await, 45);
}

#[tokio::test]
async fn enqueue_is_idempotent_while_previous_sync_is_open() {
    let f = Fixture::new();
    let artist_id = f.add_artist(0).await;

    let timer = f.timer(WatchlistConfig {
        interval: Duration::from_secs(900),
        tick_budget: Duration::from_secs(8),
        max_per_tick: 20,
    });

    assert_eq!(timer.tick().await.enqueued, 1);
    assert_eq!(f.artist_sync_jobs().await, 1);

    // Force the artist due again while the previous job is still pending.
    f.clock.advance(ChronoDuration::seconds(901));
    let summary = timer.tick().await;
    // The scan ran and "enqueued" it, but the store deduplicated on the
    // idempotency key: still exactly one row.
    assert_eq!(summary.enqueued, 1);
    assert_eq!(f.artist_sync_jobs().await, 1);

    let (jobs, total) = f
        .queue
        .list_dlq(&Default::default(), harmony_core::kernel::jobs::Page { offset: 0, limit: 10 })
        .await
        .unwrap();
    assert!(jobs.is_empty());
    assert_eq!(total, 0);

    // Sanity: the single row carries the artist id as its idempotency key.
    let leased = f
        .queue
        .lease("artist_sync", "w1", Duration::from_secs(30), 10)
        .await
        .unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(
        leased[0].idempotency_key.as_deref(),
        Some(artist_id.to_string().as_str())
    );
}

#[tokio::test]
async fn higher_priority_artists_come_first() {
    let f = Fixture::new();
    let low = f.add_artist(1).await;
    let high = f.add_artist(9).await;

    let timer = f.timer(WatchlistConfig {
        interval: Duration::from_secs(900),
        tick_budget: Duration::from_secs(8),
        max_per_tick: 1,
    });

    assert_eq!(timer.tick().await.enqueued, 1);

    let leased = f
        .queue
        .lease("artist_sync", "w1", Duration::from_secs(30), 10)
        .await
        .unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(
        leased[0].idempotency_key.as_deref(),
        Some(high.to_string().as_str())
    );
    // The artist_sync job inherits the artist's priority.
    assert_eq!(leased[0].priority, 9);

    // The low-priority artist is still waiting.
    let due = f.artists.list_due(f.clock.now(), 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].artist_id, low);
}

#[tokio::test]
async fn checked_artist_is_rescheduled_one_interval_out() {
    let f = Fixture::new();
    let artist_id = f.add_artist(0).await;

    let timer = f.timer(WatchlistConfig {
        interval: Duration::from_secs(900),
        tick_budget: Duration::from_secs(8),
        max_per_tick: 20,
    });

    let t0 = f.clock.now();
    timer.tick().await;

    let artist = f.artists.snapshot(artist_id).unwrap();
    assert_eq!(artist.last_checked_at, Some(t0));
    assert_eq!(artist.next_check_at, t0 + ChronoDuration::seconds(900));

    // Not due until the interval has fully passed.
    f.clock.advance(ChronoDuration::seconds(899));
    assert_eq!(timer.tick().await.enqueued, 0);
    f.clock.advance(ChronoDuration::seconds(1));
    assert_eq!(timer.tick().await.due, 1);
}

#[tokio::test]
async fn cooled_down_artist_is_skipped_until_expiry() {
    let f = Fixture::new();
    let artist_id = f.add_artist(0).await;

    // Exhaust the budget: cooldown pushes the artist out.
    let now = f.clock.now();
    for _ in 0..3 {
        f.artists
            .record_failure(artist_id, now, Duration::from_secs(3600), 3)
            .await
            .unwrap();
    }
    assert!(f.artists.snapshot(artist_id).unwrap().cooldown_until.is_some());

    let timer = f.timer(WatchlistConfig {
        interval: Duration::from_secs(900),
        tick_budget: Duration::from_secs(8),
        max_per_tick: 20,
    });

    assert_eq!(timer.tick().await.due, 0);

    // After the cooldown the artist comes back.
    f.clock.advance(ChronoDuration::seconds(3601));
    assert_eq!(timer.tick().await.enqueued, 1);
}

#[tokio::test]
async fn disabled_artists_never_enqueue() {
    let f = Fixture::new();
    let artist_id = f.add_artist(0).await;

    let mut artist = f.artists.snapshot(artist_id).unwrap();
    artist.enabled = false;
    f.artists.upsert(artist).await.unwrap();

    let timer = f.timer(WatchlistConfig {
        interval: Duration::from_secs(900),
        tick_budget: Duration::from_secs(8),
        max_per_tick: 20,
    });

    assert_eq!(timer.tick().await.due, 0);
    assert_eq!(f.artist_sync_jobs().await, 0);
}

#[tokio::test]
async fn enqueued_artist_sync_jobs_are_pending() {
    let f = Fixture::new();
    f.add_artist(0).await;

    let timer = f.timer(WatchlistConfig::default());
    timer.tick().await;

    let counts = f.queue.counts().await.unwrap();
    let pending: i64 = counts
        .iter()
        .filter(|c| c.job_type == "artist_sync" && c.state == JobState::Pending)
        .map(|c| c.count)
        .sum();
    assert_eq!(pending, 1);
}
