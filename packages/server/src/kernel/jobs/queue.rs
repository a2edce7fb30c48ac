//! Queue store contract.
//!
//! The store has durable, linearizable custody of job rows; every state
//! transition goes through one of these operations. Implementations:
//! [`PostgresQueueStore`](super::postgres::PostgresQueueStore) for
//! production, [`MemoryQueueStore`](super::memory::MemoryQueueStore) for
//! tests and development.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::job::{Job, JobError, JobState, NewJob};

/// Floor for lease durations. Smaller requests are rounded up and logged.
pub const MIN_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Result of an enqueue; `inserted == false` means an idempotency hit
/// returned the existing row's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub id: Uuid,
    pub inserted: bool,
}

/// Owner-checked operations either apply or report the lease as lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    Ok,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailResult {
    Retried { available_at: DateTime<Utc> },
    DeadLettered,
    Lost,
}

/// DLQ listing filter. All fields conjunctive; `q` substring-matches the
/// error message.
#[derive(Debug, Clone, Default)]
pub struct DlqFilter {
    pub job_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub q: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequeueSummary {
    pub requeued: Vec<Uuid>,
    pub skipped: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCounts {
    pub job_type: String,
    pub state: JobState,
    pub count: i64,
}

/// Durable custody of job rows.
///
/// Ordering contract: within a type, jobs are leased in
/// `(priority desc, available_at asc, id asc)` order. Budget enforcement is
/// the caller's job; the store offers [`count_leased`](Self::count_leased).
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a pending job. With an idempotency key, returns the existing
    /// non-terminal row for `(type, key)` instead of creating a duplicate.
    async fn enqueue(&self, new: NewJob) -> QueueResult<EnqueueOutcome>;

    /// Atomically lease up to `limit` ready jobs of `job_type`.
    /// `visibility` below [`MIN_VISIBILITY_TIMEOUT`] is rounded up.
    async fn lease(
        &self,
        job_type: &str,
        owner: &str,
        visibility: Duration,
        limit: usize,
    ) -> QueueResult<Vec<Job>>;

    /// Extend the lease iff `owner` still holds it.
    async fn heartbeat(&self, id: Uuid, owner: &str, extension: Duration) -> QueueResult<AckResult>;

    /// `leased → succeeded` iff `owner` holds an unexpired lease.
    async fn complete(&self, id: Uuid, owner: &str) -> QueueResult<AckResult>;

    /// Record a failed attempt. With `retry_delay` the job re-enters the
    /// pending pool at `now + delay`; without it the job is dead-lettered.
    /// Exhaustion is decided by the caller via the retry policy. Either way
    /// `attempts` increments and `last_error` is recorded.
    async fn fail(
        &self,
        id: Uuid,
        owner: &str,
        error: JobError,
        retry_delay: Option<Duration>,
    ) -> QueueResult<FailResult>;

    /// Return expired leases to `pending` without touching `attempts`.
    /// The attempt was never observed to finish; counting it would conflate
    /// crashes with handler errors.
    async fn reclaim_expired(&self) -> QueueResult<Vec<Uuid>>;

    /// Cancel a pending job. Leased jobs are not cancelled in place; that is
    /// the dispatcher's cooperative-cancellation path.
    async fn cancel(&self, id: Uuid) -> QueueResult<bool>;

    async fn get(&self, id: Uuid) -> QueueResult<Option<Job>>;

    /// Number of currently leased jobs of `job_type`.
    async fn count_leased(&self, job_type: &str) -> QueueResult<i64>;

    /// Row counts per `(type, state)`, for health and stats surfaces.
    async fn counts(&self) -> QueueResult<Vec<QueueCounts>>;

    /// Page through dead-lettered jobs.
    async fn list_dlq(&self, filter: &DlqFilter, page: Page) -> QueueResult<(Vec<Job>, i64)>;

    /// `dead_letter → pending` for each id; preserves `attempts` and
    /// `last_error`, clears lease fields. Ids not in the DLQ are skipped,
    /// which makes requeue idempotent.
    async fn requeue(&self, ids: &[Uuid]) -> QueueResult<RequeueSummary>;

    /// Delete dead-lettered rows. Returns how many were removed.
    async fn purge(&self, ids: &[Uuid]) -> QueueResult<u64>;

    /// Install the set of job types producers may enqueue. Called once from
    /// bootstrap after the handler registry is built; an empty set accepts
    /// anything (pre-bootstrap).
    fn set_known_types(&self, types: HashSet<String>);
}

/// Shared enqueue validation for store implementations.
pub(crate) fn validate_new_job(new: &NewJob, known_types: &HashSet<String>) -> QueueResult<()> {
    if new.job_type.is_empty() {
        return Err(QueueError::Validation("job type must not be empty".into()));
    }
    if !known_types.is_empty() && !known_types.contains(&new.job_type) {
        return Err(QueueError::Validation(format!(
            "unknown job type: {}",
            new.job_type
        )));
    }
    if let Some(key) = &new.idempotency_key {
        if key.is_empty() {
            return Err(QueueError::Validation(
                "idempotency key must not be empty".into(),
            ));
        }
    }
    Ok(())
}

/// Apply the visibility floor, warning when a caller asked for less.
pub(crate) fn clamp_visibility(requested: Duration) -> Duration {
    if requested < MIN_VISIBILITY_TIMEOUT {
        tracing::warn!(
            requested_ms = requested.as_millis() as u64,
            minimum_ms = MIN_VISIBILITY_TIMEOUT.as_millis() as u64,
            "visibility timeout below minimum, rounding up"
        );
        MIN_VISIBILITY_TIMEOUT
    } else {
        requested
    }
}
