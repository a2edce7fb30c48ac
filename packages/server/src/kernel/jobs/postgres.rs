//! PostgreSQL-backed queue store.
//!
//! Leasing uses `FOR UPDATE SKIP LOCKED` so concurrent dispatchers never
//! hand out the same row twice. All timestamps are bound from the injected
//! clock rather than `NOW()` so behavior matches the in-memory store under a
//! frozen test clock.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::kernel::clock::{Clock, SharedClock};

use super::job::{Job, JobError, JobState, NewJob};
use super::queue::{
    clamp_visibility, validate_new_job, AckResult, DlqFilter, EnqueueOutcome, FailResult, Page,
    QueueCounts, QueueError, QueueResult, QueueStore, RequeueSummary,
};

const JOB_COLUMNS: &str = "id, job_type, payload, priority, state, attempts, available_at, \
     lease_expires_at, lease_owner, last_error, idempotency_key, created_at, updated_at";

#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    priority: i32,
    state: JobState,
    attempts: i32,
    available_at: DateTime<Utc>,
    lease_expires_at: Option<DateTime<Utc>>,
    lease_owner: Option<String>,
    last_error: Option<serde_json::Value>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            job_type: row.job_type,
            payload: row.payload,
            priority: row.priority,
            state: row.state,
            attempts: row.attempts,
            available_at: row.available_at,
            lease_expires_at: row.lease_expires_at,
            lease_owner: row.lease_owner,
            last_error: row
                .last_error
                .and_then(|v| serde_json::from_value::<JobError>(v).ok()),
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct PostgresQueueStore {
    pool: PgPool,
    clock: SharedClock,
    known_types: RwLock<HashSet<String>>,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool, clock: SharedClock) -> Self {
        Self {
            pool,
            clock,
            known_types: RwLock::new(HashSet::new()),
        }
    }

    fn chrono(d: Duration) -> ChronoDuration {
        ChronoDuration::milliseconds(d.as_millis() as i64)
    }

    async fn find_by_idempotency_key(
        &self,
        job_type: &str,
        key: &str,
    ) -> QueueResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE job_type = $1
              AND idempotency_key = $2
              AND state IN ('pending', 'leased', 'failed_retry')
            LIMIT 1
            "#
        ))
        .bind(job_type)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Job::from))
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn enqueue(&self, new: NewJob) -> QueueResult<EnqueueOutcome> {
        {
            let known = self.known_types.read().unwrap_or_else(|e| e.into_inner());
            validate_new_job(&new, &known)?;
        }

        let now = self.clock.now();

        if let Some(key) = &new.idempotency_key {
            if let Some(existing) = self.find_by_idempotency_key(&new.job_type, key).await? {
                return Ok(EnqueueOutcome {
                    id: existing.id,
                    inserted: false,
                });
            }
        }

        let id = Uuid::new_v4();
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO jobs (
                id, job_type, payload, priority, state, attempts,
                available_at, idempotency_key, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $7, $7)
            ON CONFLICT (job_type, idempotency_key)
                WHERE idempotency_key IS NOT NULL
                  AND state IN ('pending', 'leased', 'failed_retry')
                DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&new.job_type)
        .bind(&new.payload)
        .bind(new.priority)
        .bind(new.available_at.unwrap_or(now))
        .bind(&new.idempotency_key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(id) => Ok(EnqueueOutcome { id, inserted: true }),
            None => {
                // Lost the insert race; the winning row is the answer.
                let key = new.idempotency_key.as_deref().unwrap_or_default();
                let existing = self
                    .find_by_idempotency_key(&new.job_type, key)
                    .await?
                    .ok_or_else(|| {
                        QueueError::Other(anyhow::anyhow!(
                            "idempotency conflict without a surviving row"
                        ))
                    })?;
                Ok(EnqueueOutcome {
                    id: existing.id,
                    inserted: false,
                })
            }
        }
    }

    async fn lease(
        &self,
        job_type: &str,
        owner: &str,
        visibility: Duration,
        limit: usize,
    ) -> QueueResult<Vec<Job>> {
        let visibility = clamp_visibility(visibility);
        let now = self.clock.now();
        let expires = now + Self::chrono(visibility);

        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE job_type = $1
                  AND state IN ('pending', 'failed_retry')
                  AND available_at <= $2
                ORDER BY priority DESC, available_at ASC, id ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET state = 'leased',
                lease_owner = $4,
                lease_expires_at = $5,
                updated_at = $2
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_type)
        .bind(now)
        .bind(limit as i64)
        .bind(owner)
        .bind(expires)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs: Vec<Job> = rows.into_iter().map(Job::from).collect();
        // The UPDATE does not preserve CTE order.
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.available_at.cmp(&b.available_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(jobs)
    }

    async fn heartbeat(&self, id: Uuid, owner: &str, extension: Duration) -> QueueResult<AckResult> {
        let now = self.clock.now();
        let expires = now + Self::chrono(clamp_visibility(extension));

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = $1, updated_at = $2
            WHERE id = $3 AND lease_owner = $4 AND state = 'leased'
            "#,
        )
        .bind(expires)
        .bind(now)
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() > 0 {
            AckResult::Ok
        } else {
            AckResult::Lost
        })
    }

    async fn complete(&self, id: Uuid, owner: &str) -> QueueResult<AckResult> {
        let now = self.clock.now();

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'succeeded',
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = $1
            WHERE id = $2
              AND lease_owner = $3
              AND state = 'leased'
              AND lease_expires_at > $1
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() > 0 {
            AckResult::Ok
        } else {
            AckResult::Lost
        })
    }

    async fn fail(
        &self,
        id: Uuid,
        owner: &str,
        error: JobError,
        retry_delay: Option<Duration>,
    ) -> QueueResult<FailResult> {
        let now = self.clock.now();
        let error_json = serde_json::to_value(&error)
            .map_err(|e| QueueError::Other(anyhow::anyhow!("serialize last_error: {e}")))?;

        match retry_delay {
            Some(delay) => {
                let available_at = now + Self::chrono(delay);
                let result = sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'failed_retry',
                        attempts = attempts + 1,
                        last_error = $1,
                        available_at = $2,
                        lease_owner = NULL,
                        lease_expires_at = NULL,
                        updated_at = $3
                    WHERE id = $4 AND lease_owner = $5 AND state = 'leased'
                    "#,
                )
                .bind(&error_json)
                .bind(available_at)
                .bind(now)
                .bind(id)
                .bind(owner)
                .execute(&self.pool)
                .await?;

                Ok(if result.rows_affected() > 0 {
                    FailResult::Retried { available_at }
                } else {
                    FailResult::Lost
                })
            }
            None => {
                let result = sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'dead_letter',
                        attempts = attempts + 1,
                        last_error = $1,
                        lease_owner = NULL,
                        lease_expires_at = NULL,
                        updated_at = $2
                    WHERE id = $3 AND lease_owner = $4 AND state = 'leased'
                    "#,
                )
                .bind(&error_json)
                .bind(now)
                .bind(id)
                .bind(owner)
                .execute(&self.pool)
                .await?;

                Ok(if result.rows_affected() > 0 {
                    FailResult::DeadLettered
                } else {
                    FailResult::Lost
                })
            }
        }
    }

    async fn reclaim_expired(&self) -> QueueResult<Vec<Uuid>> {
        let now = self.clock.now();

        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE jobs
            SET state = 'pending',
                lease_owner = NULL,
                lease_expires_at = NULL,
                available_at = $1,
                updated_at = $1
            WHERE state = 'leased' AND lease_expires_at <= $1
            RETURNING id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn cancel(&self, id: Uuid) -> QueueResult<bool> {
        let now = self.clock.now();

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'cancelled', updated_at = $1
            WHERE id = $2 AND state IN ('pending', 'failed_retry')
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: Uuid) -> QueueResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Job::from))
    }

    async fn count_leased(&self, job_type: &str) -> QueueResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM jobs WHERE job_type = $1 AND state = 'leased'",
        )
        .bind(job_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn counts(&self) -> QueueResult<Vec<QueueCounts>> {
        let rows = sqlx::query_as::<_, (String, JobState, i64)>(
            r#"
            SELECT job_type, state, COUNT(*)
            FROM jobs
            GROUP BY job_type, state
            ORDER BY job_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(job_type, state, count)| QueueCounts {
                job_type,
                state,
                count,
            })
            .collect())
    }

    async fn list_dlq(&self, filter: &DlqFilter, page: Page) -> QueueResult<(Vec<Job>, i64)> {
        let q_pattern = filter.q.as_ref().map(|q| format!("%{q}%"));

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM jobs
            WHERE state = 'dead_letter'
              AND ($1::text IS NULL OR job_type = $1)
              AND ($2::timestamptz IS NULL OR updated_at >= $2)
              AND ($3::timestamptz IS NULL OR updated_at <= $3)
              AND ($4::text IS NULL OR last_error->>'message' ILIKE $4)
            "#,
        )
        .bind(&filter.job_type)
        .bind(filter.since)
        .bind(filter.until)
        .bind(&q_pattern)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE state = 'dead_letter'
              AND ($1::text IS NULL OR job_type = $1)
              AND ($2::timestamptz IS NULL OR updated_at >= $2)
              AND ($3::timestamptz IS NULL OR updated_at <= $3)
              AND ($4::text IS NULL OR last_error->>'message' ILIKE $4)
            ORDER BY updated_at DESC, id ASC
            OFFSET $5 LIMIT $6
            "#
        ))
        .bind(&filter.job_type)
        .bind(filter.since)
        .bind(filter.until)
        .bind(&q_pattern)
        .bind(page.offset.max(0))
        .bind(page.limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.into_iter().map(Job::from).collect(), total))
    }

    async fn requeue(&self, ids: &[Uuid]) -> QueueResult<RequeueSummary> {
        let now = self.clock.now();

        let requeued = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE jobs
            SET state = 'pending',
                available_at = $1,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = $1
            WHERE id = ANY($2) AND state = 'dead_letter'
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let requeued_set: HashSet<Uuid> = requeued.iter().copied().collect();
        let skipped = ids
            .iter()
            .filter(|id| !requeued_set.contains(id))
            .copied()
            .collect();

        Ok(RequeueSummary { requeued, skipped })
    }

    async fn purge(&self, ids: &[Uuid]) -> QueueResult<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ANY($1) AND state = 'dead_letter'")
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    fn set_known_types(&self, types: HashSet<String>) {
        *self.known_types.write().unwrap_or_else(|e| e.into_inner()) = types;
    }
}
