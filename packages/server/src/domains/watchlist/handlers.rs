//! Watchlist job handlers.
//!
//! Thin adapters between job payloads and the metadata provider. Catalog
//! discovery fans out into `sync` jobs; retry budgets and cooldowns live on
//! the watched artist row, not on the job.

use std::sync::Arc;

use tracing::info;

use crate::domains::sync::jobs::SyncDownloadJob;
use crate::domains::watchlist::store::WatchedArtistStore;
use crate::kernel::clock::Clock;
use crate::kernel::deps::ServerDeps;
use crate::kernel::jobs::job::{ErrorKind, NewJob};
use crate::kernel::jobs::queue::QueueStore;
use crate::kernel::jobs::registry::{HandlerRegistry, HandlerSpec, JobContext, Outcome};
use crate::kernel::jobs::retry::RetryProfileKind;
use crate::kernel::jobs::watchlist::scan_due;
use crate::kernel::traits::{MetadataProvider, ProviderError};

use super::jobs::{ArtistSyncJob, WatchlistScanJob};

/// Charge a failed sync against the artist's budget, then surface the error.
async fn charge_failure(job: &ArtistSyncJob, deps: &ServerDeps, error: ProviderError) -> Outcome {
    let policy = &deps.watchlist_policy;
    let budget = deps
        .artists
        .record_failure(
            job.artist_id,
            deps.clock.now(),
            policy.cooldown,
            policy.retry_budget_per_artist,
        )
        .await;

    match budget {
        Ok(budget) if budget.cooled_down => {
            info!(
                artist_id = %job.artist_id,
                "artist retry budget exhausted, cooldown applied"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(artist_id = %job.artist_id, error = %e, "failed to record artist failure");
        }
    }

    if error.is_retryable() {
        Outcome::Retryable(error.into())
    } else {
        Outcome::Fatal(error.into())
    }
}

/// Handle ArtistSyncJob.
///
/// Reads the artist's catalog and enqueues one `sync` job per track not yet
/// seen. Idempotency keys keep re-scans from duplicating work.
pub async fn handle_artist_sync(
    job: ArtistSyncJob,
    ctx: JobContext,
    deps: Arc<ServerDeps>,
) -> Outcome {
    let Some(spotify_id) = job.external_ids.get("spotify").and_then(|v| v.as_str()) else {
        return Outcome::fatal(
            ErrorKind::Validation,
            format!("watched artist {} has no spotify id", job.artist_id),
        );
    };

    let albums = match deps.metadata.artist_albums(spotify_id).await {
        Ok(albums) => albums,
        Err(e) => return charge_failure(&job, &deps, e).await,
    };

    let mut enqueued = 0usize;
    for album in &albums {
        if ctx.is_cancelled() {
            return Outcome::retryable(ErrorKind::Cancelled, "cancelled during catalog walk");
        }

        let tracks = match deps.metadata.album_tracks(&album.id).await {
            Ok(tracks) => tracks,
            Err(e) => return charge_failure(&job, &deps, e).await,
        };

        for track in tracks {
            let payload = SyncDownloadJob {
                artist: track.artist.clone(),
                title: track.title.clone(),
                album: Some(album.name.clone()),
                duration_secs: track.duration_secs,
            };
            let new = NewJob::builder()
                .job_type(SyncDownloadJob::JOB_TYPE)
                .payload(match serde_json::to_value(&payload) {
                    Ok(v) => v,
                    Err(e) => {
                        return Outcome::fatal(ErrorKind::Internal, format!("serialize sync job: {e}"))
                    }
                })
                .priority(job.priority)
                .idempotency_key(format!("{}:{}:{}", job.artist_id, album.id, track.title))
                .build();

            match deps.queue.enqueue(new).await {
                Ok(out) if out.inserted => enqueued += 1,
                Ok(_) => {}
                Err(e) => {
                    return Outcome::retryable(
                        ErrorKind::Dependency,
                        format!("enqueue sync job: {e}"),
                    )
                }
            }
        }
    }

    if let Err(e) = deps
        .artists
        .record_success(job.artist_id, deps.watchlist_policy.retry_budget_per_artist)
        .await
    {
        tracing::warn!(artist_id = %job.artist_id, error = %e, "failed to reset artist budget");
    }

    info!(
        artist_id = %job.artist_id,
        albums = albums.len(),
        enqueued,
        "artist sync complete"
    );
    Outcome::Done
}

/// Handle WatchlistScanJob.
///
/// Same work as one timer tick, for operators who want a scan now.
pub async fn handle_watchlist_scan(
    _job: WatchlistScanJob,
    _ctx: JobContext,
    deps: Arc<ServerDeps>,
) -> Outcome {
    let policy = &deps.watchlist_policy;
    match scan_due(
        &*deps.artists,
        &*deps.queue,
        &deps.clock,
        policy.max_per_tick,
        policy.tick_budget,
    )
    .await
    {
        Ok(summary) => {
            info!(enqueued = summary.enqueued, deferred = summary.deferred, "on-demand scan done");
            Outcome::Done
        }
        Err(e) => Outcome::retryable(ErrorKind::Dependency, format!("watchlist scan: {e}")),
    }
}

/// Register all watchlist job handlers with the registry.
pub fn register_watchlist_jobs(registry: &mut HandlerRegistry) {
    registry.register::<ArtistSyncJob, _, _>(
        ArtistSyncJob::JOB_TYPE,
        HandlerSpec {
            max_attempts: 8,
            retry_profile: RetryProfileKind::Watchlist,
            ..HandlerSpec::default()
        },
        |job, ctx, deps| async move { handle_artist_sync(job, ctx, deps).await },
    );

    registry.register::<WatchlistScanJob, _, _>(
        WatchlistScanJob::JOB_TYPE,
        HandlerSpec {
            max_attempts: 3,
            retry_profile: RetryProfileKind::Watchlist,
            ..HandlerSpec::default()
        },
        |job, ctx, deps| async move { handle_watchlist_scan(job, ctx, deps).await },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::registry::job_types;
    use crate::kernel::test_dependencies::{
        MockMetadataProvider, MockSourceProvider, ProviderErrorKind,
    };
    use crate::kernel::traits::{AlbumRef, TrackRef};
    use crate::domains::watchlist::model::WatchedArtist;
    use crate::domains::watchlist::store::MemoryWatchedArtistStore;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn deps_with(
        metadata: MockMetadataProvider,
        artists: Arc<MemoryWatchedArtistStore>,
    ) -> Arc<ServerDeps> {
        let base = ServerDeps::for_tests();
        Arc::new(ServerDeps {
            metadata: Arc::new(metadata),
            source: Arc::new(MockSourceProvider::new()),
            artists,
            ..base
        })
    }

    fn ctx(deps: &ServerDeps) -> JobContext {
        JobContext {
            job_id: Uuid::new_v4(),
            attempt: 1,
            deadline: deps.clock.now() + chrono::Duration::seconds(60),
            cancel: CancellationToken::new(),
            clock: deps.clock.clone(),
        }
    }

    async fn watched(artists: &MemoryWatchedArtistStore, deps: &ServerDeps) -> ArtistSyncJob {
        let artist_id = Uuid::new_v4();
        let artist = WatchedArtist::builder()
            .artist_id(artist_id)
            .name("Plaid")
            .external_ids(serde_json::json!({"spotify": "sp-1"}))
            .interval(Duration::from_secs(900))
            .next_check_at(deps.clock.now())
            .retry_budget_remaining(2)
            .build();
        artists.upsert(artist).await.unwrap();
        ArtistSyncJob {
            artist_id,
            name: "Plaid".into(),
            external_ids: serde_json::json!({"spotify": "sp-1"}),
            priority: 5,
        }
    }

    #[tokio::test]
    async fn artist_sync_enqueues_one_job_per_track() {
        let metadata = MockMetadataProvider::with_albums(vec![AlbumRef {
            id: "album-1".into(),
            name: "Double Figure".into(),
            release_date: None,
            total_tracks: 2,
        }]);
        metadata.set_tracks(vec![
            TrackRef {
                artist: "Plaid".into(),
                title: "Eyen".into(),
                album: None,
                duration_secs: Some(243),
            },
            TrackRef {
                artist: "Plaid".into(),
                title: "Squance".into(),
                album: None,
                duration_secs: Some(281),
            },
        ]);

        let artists = Arc::new(MemoryWatchedArtistStore::new());
        let deps = deps_with(metadata, artists.clone());
        let job = watched(&artists, &deps).await;

        let outcome = handle_artist_sync(job, ctx(&deps), deps.clone()).await;
        assert_eq!(outcome, Outcome::Done);

        let counts = deps.queue.counts().await.unwrap();
        let sync_count: i64 = counts
            .iter()
            .filter(|c| c.job_type == job_types::SYNC)
            .map(|c| c.count)
            .sum();
        assert_eq!(sync_count, 2);
    }

    #[tokio::test]
    async fn missing_spotify_id_is_fatal() {
        let artists = Arc::new(MemoryWatchedArtistStore::new());
        let deps = deps_with(MockMetadataProvider::new(), artists);
        let job = ArtistSyncJob {
            artist_id: Uuid::new_v4(),
            name: "Unknown".into(),
            external_ids: serde_json::Value::Null,
            priority: 0,
        };

        match handle_artist_sync(job, ctx(&deps), deps.clone()).await {
            Outcome::Fatal(err) => assert_eq!(err.kind, ErrorKind::Validation),
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn provider_failure_charges_the_retry_budget() {
        let metadata = MockMetadataProvider::new();
        metadata.fail_times(1, ProviderErrorKind::Dependency);

        let artists = Arc::new(MemoryWatchedArtistStore::new());
        let deps = deps_with(metadata, artists.clone());
        let job = watched(&artists, &deps).await;
        let artist_id = job.artist_id;

        match handle_artist_sync(job, ctx(&deps), deps.clone()).await {
            Outcome::Retryable(err) => assert_eq!(err.kind, ErrorKind::Dependency),
            other => panic!("expected retryable, got {other:?}"),
        }

        let stored = artists.snapshot(artist_id).unwrap();
        assert_eq!(stored.retry_budget_remaining, 1);
        assert!(stored.cooldown_until.is_none());
    }

    #[tokio::test]
    async fn budget_exhaustion_applies_cooldown() {
        let metadata = MockMetadataProvider::new();
        metadata.fail_times(2, ProviderErrorKind::Dependency);

        let artists = Arc::new(MemoryWatchedArtistStore::new());
        let deps = deps_with(metadata, artists.clone());
        let job = watched(&artists, &deps).await;
        let artist_id = job.artist_id;

        handle_artist_sync(job.clone(), ctx(&deps), deps.clone()).await;
        handle_artist_sync(job, ctx(&deps), deps.clone()).await;

        let stored = artists.snapshot(artist_id).unwrap();
        assert!(stored.cooldown_until.is_some());
        assert!(!stored.is_due(deps.clock.now()));
        // Budget reset to the policy value for after the cooldown.
        assert_eq!(
            stored.retry_budget_remaining,
            deps.watchlist_policy.retry_budget_per_artist
        );
    }

    #[tokio::test]
    async fn not_found_is_fatal() {
        let metadata = MockMetadataProvider::new();
        metadata.fail_times(1, ProviderErrorKind::NotFound);

        let artists = Arc::new(MemoryWatchedArtistStore::new());
        let deps = deps_with(metadata, artists.clone());
        let job = watched(&artists, &deps).await;

        match handle_artist_sync(job, ctx(&deps), deps.clone()).await {
            Outcome::Fatal(err) => assert_eq!(err.kind, ErrorKind::NotFound),
            other => panic!("expected fatal, got {other:?}"),
        }
    }
}
