//! Sync and retry job handlers.
//!
//! `sync` searches the source network, scores the results and requests the
//! best download; `retry` watches a requested transfer and restarts it when
//! the peer dropped it. Both are thin adapters over the provider traits.

use std::sync::Arc;

use tracing::{debug, info};

use crate::domains::matching::engine::best_candidate;
use crate::kernel::deps::ServerDeps;
use crate::kernel::jobs::job::{ErrorKind, NewJob};
use crate::kernel::jobs::queue::QueueStore;
use crate::kernel::jobs::registry::{HandlerRegistry, HandlerSpec, JobContext, Outcome};
use crate::kernel::jobs::retry::RetryProfileKind;
use crate::kernel::traits::{Candidate, ProviderError, SourceProvider, TrackRef, TransferState};

use super::jobs::{RetryDownloadJob, SyncDownloadJob};

fn provider_outcome(error: ProviderError) -> Outcome {
    if error.is_retryable() {
        Outcome::Retryable(error.into())
    } else {
        Outcome::Fatal(error.into())
    }
}

/// Request the download and enqueue the transfer watcher.
async fn start_download(candidate: &Candidate, priority: i32, deps: &ServerDeps) -> Outcome {
    if let Err(e) = deps.source.download(candidate).await {
        return provider_outcome(e);
    }

    let retry = RetryDownloadJob {
        candidate: candidate.clone(),
    };
    let new = NewJob::builder()
        .job_type(RetryDownloadJob::JOB_TYPE)
        .payload(match serde_json::to_value(&retry) {
            Ok(v) => v,
            Err(e) => return Outcome::fatal(ErrorKind::Internal, format!("serialize retry job: {e}")),
        })
        .priority(priority)
        .idempotency_key(retry.idempotency_key())
        .build();

    if let Err(e) = deps.queue.enqueue(new).await {
        return Outcome::retryable(ErrorKind::Dependency, format!("enqueue retry job: {e}"));
    }
    Outcome::Done
}

/// Handle SyncDownloadJob.
pub async fn handle_sync(job: SyncDownloadJob, ctx: JobContext, deps: Arc<ServerDeps>) -> Outcome {
    if job.artist.trim().is_empty() || job.title.trim().is_empty() {
        return Outcome::fatal(ErrorKind::Validation, "sync job needs artist and title");
    }

    let candidates = match deps.source.search(&job.search_query()).await {
        Ok(candidates) => candidates,
        Err(e) => return provider_outcome(e),
    };

    if ctx.is_cancelled() {
        return Outcome::retryable(ErrorKind::Cancelled, "cancelled after search");
    }

    let track = TrackRef {
        artist: job.artist.clone(),
        title: job.title.clone(),
        album: job.album.clone(),
        duration_secs: job.duration_secs,
    };

    let Some((best, score)) = best_candidate(&track, &candidates) else {
        // Peers churn constantly; an empty or weak result set is worth
        // another look after backoff.
        return Outcome::retryable(
            ErrorKind::Dependency,
            format!(
                "no acceptable candidate among {} results for {}",
                candidates.len(),
                job.search_query()
            ),
        );
    };

    debug!(
        filename = %best.filename,
        username = %best.username,
        score,
        "selected candidate"
    );

    start_download(best, 0, &deps).await
}

/// Handle RetryDownloadJob.
pub async fn handle_retry(
    job: RetryDownloadJob,
    ctx: JobContext,
    deps: Arc<ServerDeps>,
) -> Outcome {
    let candidate = &job.candidate;

    let state = match deps
        .source
        .download_state(&candidate.username, &candidate.filename)
        .await
    {
        Ok(state) => state,
        Err(e) => return provider_outcome(e),
    };

    if ctx.is_cancelled() {
        return Outcome::retryable(ErrorKind::Cancelled, "cancelled after status poll");
    }

    match state {
        TransferState::Complete => {
            info!(filename = %candidate.filename, "transfer complete");
            Outcome::Done
        }
        TransferState::Queued | TransferState::InProgress { .. } => Outcome::retryable(
            ErrorKind::Dependency,
            format!("transfer of {} still in flight", candidate.filename),
        ),
        TransferState::Failed(reason) => {
            // Ask the peer again; the orchestrator spaces the attempts.
            if let Err(e) = deps.source.download(candidate).await {
                return provider_outcome(e);
            }
            Outcome::retryable(
                ErrorKind::Dependency,
                format!("transfer failed ({reason}), restarted"),
            )
        }
    }
}

/// Register sync job handlers with the registry.
pub fn register_sync_jobs(registry: &mut HandlerRegistry) {
    registry.register::<SyncDownloadJob, _, _>(
        SyncDownloadJob::JOB_TYPE,
        HandlerSpec {
            max_attempts: 5,
            retry_profile: RetryProfileKind::Download,
            ..HandlerSpec::default()
        },
        |job, ctx, deps| async move { handle_sync(job, ctx, deps).await },
    );

    registry.register::<RetryDownloadJob, _, _>(
        RetryDownloadJob::JOB_TYPE,
        HandlerSpec {
            max_attempts: 10,
            retry_profile: RetryProfileKind::Download,
            ..HandlerSpec::default()
        },
        |job, ctx, deps| async move { handle_retry(job, ctx, deps).await },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::clock::Clock;
    use crate::kernel::jobs::registry::job_types;
    use crate::kernel::test_dependencies::{MockSourceProvider, ProviderErrorKind};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn good_candidate() -> Candidate {
        Candidate {
            username: "peer1".into(),
            filename: "Burial - Archangel.flac".into(),
            size: 40_000_000,
            bit_rate: None,
            duration_secs: Some(238),
            free_upload_slot: true,
            queue_length: 0,
        }
    }

    fn sync_job() -> SyncDownloadJob {
        SyncDownloadJob {
            artist: "Burial".into(),
            title: "Archangel".into(),
            album: Some("Untrue".into()),
            duration_secs: Some(238),
        }
    }

    fn deps_with(source: MockSourceProvider) -> Arc<ServerDeps> {
        let base = ServerDeps::for_tests();
        Arc::new(ServerDeps {
            source: Arc::new(source),
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

    #[tokio::test]
    async fn sync_downloads_best_candidate_and_enqueues_watcher() {
        let source = MockSourceProvider::with_candidates(vec![good_candidate()]);
        let deps = deps_with(source);

        let outcome = handle_sync(sync_job(), ctx(&deps), deps.clone()).await;
        assert_eq!(outcome, Outcome::Done);

        let counts = deps.queue.counts().await.unwrap();
        let retry_jobs: i64 = counts
            .iter()
            .filter(|c| c.job_type == job_types::RETRY)
            .map(|c| c.count)
            .sum();
        assert_eq!(retry_jobs, 1);
    }

    #[tokio::test]
    async fn sync_with_no_acceptable_candidate_retries() {
        let source = MockSourceProvider::with_candidates(vec![]);
        let deps = deps_with(source);

        match handle_sync(sync_job(), ctx(&deps), deps.clone()).await {
            Outcome::Retryable(err) => assert_eq!(err.kind, ErrorKind::Dependency),
            other => panic!("expected retryable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sync_surfaces_rate_limit_hint() {
        let source = MockSourceProvider::new();
        source.fail_times(1, ProviderErrorKind::RateLimited { retry_after_secs: Some(7) });
        let deps = deps_with(source);

        match handle_sync(sync_job(), ctx(&deps), deps.clone()).await {
            Outcome::Retryable(err) => {
                assert_eq!(err.kind, ErrorKind::RateLimited);
                assert_eq!(err.retry_after_ms(), Some(7000));
            }
            other => panic!("expected retryable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_track_is_fatal_validation() {
        let deps = deps_with(MockSourceProvider::new());
        let job = SyncDownloadJob {
            artist: " ".into(),
            title: String::new(),
            album: None,
            duration_secs: None,
        };

        match handle_sync(job, ctx(&deps), deps.clone()).await {
            Outcome::Fatal(err) => assert_eq!(err.kind, ErrorKind::Validation),
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retry_completes_when_transfer_finished() {
        let source = MockSourceProvider::new();
        source.set_transfer_state(TransferState::Complete);
        let deps = deps_with(source);

        let job = RetryDownloadJob {
            candidate: good_candidate(),
        };
        assert_eq!(handle_retry(job, ctx(&deps), deps.clone()).await, Outcome::Done);
    }

    #[tokio::test]
    async fn retry_restarts_failed_transfer() {
        let source = MockSourceProvider::new();
        source.set_transfer_state(TransferState::Failed("peer gone".into()));
        let deps = deps_with(source);

        let job = RetryDownloadJob {
            candidate: good_candidate(),
        };
        match handle_retry(job, ctx(&deps), deps.clone()).await {
            Outcome::Retryable(err) => {
                assert_eq!(err.kind, ErrorKind::Dependency);
                assert!(err.message.contains("restarted"));
            }
            other => panic!("expected retryable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retry_keeps_waiting_while_in_flight() {
        let source = MockSourceProvider::new();
        source.set_transfer_state(TransferState::InProgress {
            transferred: 10,
            total: 100,
        });
        let deps = deps_with(source);

        let job = RetryDownloadJob {
            candidate: good_candidate(),
        };
        assert!(matches!(
            handle_retry(job, ctx(&deps), deps.clone()).await,
            Outcome::Retryable(_)
        ));
    }
}
