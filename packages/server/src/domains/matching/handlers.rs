//! Matching job handler.

use std::sync::Arc;

use tracing::debug;

use crate::domains::sync::jobs::RetryDownloadJob;
use crate::kernel::deps::ServerDeps;
use crate::kernel::jobs::job::{ErrorKind, NewJob};
use crate::kernel::jobs::queue::QueueStore;
use crate::kernel::jobs::registry::{HandlerRegistry, HandlerSpec, JobContext, Outcome};
use crate::kernel::jobs::retry::RetryProfileKind;
use crate::kernel::traits::SourceProvider;

use super::engine::best_candidate;
use super::jobs::MatchingJob;

/// Handle MatchingJob.
///
/// The candidate set is fixed in the payload, so a weak result set cannot
/// improve on retry; not finding a match is final.
pub async fn handle_matching(job: MatchingJob, ctx: JobContext, deps: Arc<ServerDeps>) -> Outcome {
    if job.candidates.is_empty() {
        return Outcome::fatal(ErrorKind::Validation, "matching job has no candidates");
    }

    let Some((best, score)) = best_candidate(&job.track, &job.candidates) else {
        return Outcome::fatal(
            ErrorKind::NotFound,
            format!(
                "none of {} candidates matched {} - {}",
                job.candidates.len(),
                job.track.artist,
                job.track.title
            ),
        );
    };

    debug!(filename = %best.filename, score, "matching selected candidate");

    if ctx.is_cancelled() {
        return Outcome::retryable(ErrorKind::Cancelled, "cancelled before download");
    }

    if let Err(e) = deps.source.download(best).await {
        return if e.is_retryable() {
            Outcome::Retryable(e.into())
        } else {
            Outcome::Fatal(e.into())
        };
    }

    let retry = RetryDownloadJob {
        candidate: best.clone(),
    };
    let new = NewJob::builder()
        .job_type(RetryDownloadJob::JOB_TYPE)
        .payload(match serde_json::to_value(&retry) {
            Ok(v) => v,
            Err(e) => return Outcome::fatal(ErrorKind::Internal, format!("serialize retry job: {e}")),
        })
        .idempotency_key(retry.idempotency_key())
        .build();

    if let Err(e) = deps.queue.enqueue(new).await {
        return Outcome::retryable(ErrorKind::Dependency, format!("enqueue retry job: {e}"));
    }

    Outcome::Done
}

/// Register the matching handler with the registry.
pub fn register_matching_jobs(registry: &mut HandlerRegistry) {
    registry.register::<MatchingJob, _, _>(
        MatchingJob::JOB_TYPE,
        HandlerSpec {
            max_attempts: 3,
            retry_profile: RetryProfileKind::Download,
            ..HandlerSpec::default()
        },
        |job, ctx, deps| async move { handle_matching(job, ctx, deps).await },
    );
}
