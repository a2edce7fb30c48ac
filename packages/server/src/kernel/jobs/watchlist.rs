//! Watchlist timer.
//!
//! Periodic producer: turns due watched artists into `artist_sync` jobs.
//! Each tick works under a time budget; artists it cannot reach before the
//! deadline are left untouched and picked up next tick, so no partial work
//! is lost.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::domains::watchlist::jobs::ArtistSyncJob;
use crate::domains::watchlist::store::WatchedArtistStore;
use crate::kernel::clock::{Clock, SharedClock};
use crate::kernel::events::{names, EventSink, WorkerEvent};

use super::job::NewJob;
use super::queue::QueueStore;

const COMPONENT: &str = "watchlist";

#[derive(Debug, Clone)]
pub struct WatchlistConfig {
    /// Scan cadence.
    pub interval: Duration,
    /// Per-tick work deadline.
    pub tick_budget: Duration,
    /// Max artists enqueued per tick.
    pub max_per_tick: usize,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            tick_budget: Duration::from_secs(8),
            max_per_tick: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub due: usize,
    pub enqueued: usize,
    /// Due artists deferred to the next tick by the budget deadline.
    pub deferred: usize,
}

/// One scan pass: enqueue `artist_sync` for due artists, newest obligations
/// first, stopping at the budget deadline. `last_checked_at` moves only for
/// artists that were actually enqueued.
pub async fn scan_due(
    artists: &dyn WatchedArtistStore,
    queue: &dyn QueueStore,
    clock: &SharedClock,
    max_per_tick: usize,
    tick_budget: Duration,
) -> Result<ScanSummary> {
    let deadline = tokio::time::Instant::now() + tick_budget;
    let now = clock.now();

    let due = artists.list_due(now, max_per_tick).await?;
    let mut summary = ScanSummary {
        due: due.len(),
        ..Default::default()
    };

    for (index, artist) in due.iter().enumerate() {
        if tokio::time::Instant::now() >= deadline {
            summary.deferred = due.len() - index;
            break;
        }

        let payload = ArtistSyncJob {
            artist_id: artist.artist_id,
            name: artist.name.clone(),
            external_ids: artist.external_ids.clone(),
            priority: artist.priority,
        };

        let new = NewJob::builder()
            .job_type(ArtistSyncJob::JOB_TYPE)
            .payload(serde_json::to_value(&payload)?)
            .priority(artist.priority)
            .idempotency_key(payload.idempotency_key())
            .build();

        queue.enqueue(new).await?;
        artists.mark_checked(artist.artist_id, now).await?;
        summary.enqueued += 1;
    }

    Ok(summary)
}

pub struct WatchlistTimer {
    artists: Arc<dyn WatchedArtistStore>,
    queue: Arc<dyn QueueStore>,
    clock: SharedClock,
    events: Arc<dyn EventSink>,
    config: WatchlistConfig,
    shutdown: CancellationToken,
}

impl WatchlistTimer {
    pub fn new(
        artists: Arc<dyn WatchedArtistStore>,
        queue: Arc<dyn QueueStore>,
        clock: SharedClock,
        events: Arc<dyn EventSink>,
        config: WatchlistConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            artists,
            queue,
            clock,
            events,
            config,
            shutdown,
        }
    }

    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {
                    self.tick().await;
                }
            }
        }
        tracing::debug!("watchlist timer stopped");
    }

    /// One tick, also callable directly (tests, on-demand scan handler).
    pub async fn tick(&self) -> ScanSummary {
        let started = tokio::time::Instant::now();

        match scan_due(
            &*self.artists,
            &*self.queue,
            &self.clock,
            self.config.max_per_tick,
            self.config.tick_budget,
        )
        .await
        {
            Ok(summary) => {
                self.events.emit(
                    WorkerEvent::new(names::TIMER_TICK, COMPONENT, "ok")
                        .duration_ms(started.elapsed().as_millis() as u64)
                        .meta(serde_json::json!({
                            "due": summary.due,
                            "enqueued": summary.enqueued,
                            "deferred": summary.deferred,
                        })),
                );
                summary
            }
            Err(e) => {
                tracing::error!(error = %e, "watchlist tick failed");
                self.events.emit(
                    WorkerEvent::new(names::TIMER_TICK, COMPONENT, "error")
                        .duration_ms(started.elapsed().as_millis() as u64),
                );
                ScanSummary::default()
            }
        }
    }
}
