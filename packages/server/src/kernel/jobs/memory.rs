//! In-memory queue store.
//!
//! Same contract as the Postgres store, linearized under one mutex. Used by
//! the integration tests (paired with a manual clock) and by development
//! setups that do not want a database.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use uuid::Uuid;

use crate::kernel::clock::{Clock, SharedClock};

use super::job::{Job, JobError, JobState, NewJob};
use super::queue::{
    clamp_visibility, validate_new_job, AckResult, DlqFilter, EnqueueOutcome, FailResult, Page,
    QueueCounts, QueueError, QueueResult, QueueStore, RequeueSummary,
};

pub struct MemoryQueueStore {
    clock: SharedClock,
    jobs: Mutex<HashMap<Uuid, Job>>,
    known_types: RwLock<HashSet<String>>,
}

impl MemoryQueueStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            jobs: Mutex::new(HashMap::new()),
            known_types: RwLock::new(HashSet::new()),
        }
    }

    fn chrono(d: Duration) -> ChronoDuration {
        ChronoDuration::milliseconds(d.as_millis() as i64)
    }

    /// Snapshot a job for assertions without going through `get`.
    pub fn snapshot(&self, id: Uuid) -> Option<Job> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, new: NewJob) -> QueueResult<EnqueueOutcome> {
        {
            let known = self.known_types.read().unwrap_or_else(|e| e.into_inner());
            validate_new_job(&new, &known)?;
        }

        let now = self.clock.now();
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(key) = &new.idempotency_key {
            let existing = jobs.values().find(|j| {
                j.job_type == new.job_type
                    && j.idempotency_key.as_deref() == Some(key.as_str())
                    && !j.state.is_terminal()
            });
            if let Some(existing) = existing {
                return Ok(EnqueueOutcome {
                    id: existing.id,
                    inserted: false,
                });
            }
        }

        let job = Job::builder()
            .job_type(new.job_type)
            .payload(new.payload)
            .priority(new.priority)
            .available_at(new.available_at.unwrap_or(now))
            .created_at(now)
            .updated_at(now)
            .build();
        let job = Job {
            idempotency_key: new.idempotency_key,
            ..job
        };

        let id = job.id;
        jobs.insert(id, job);
        Ok(EnqueueOutcome { id, inserted: true })
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
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());

        let mut ready: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.job_type == job_type && j.is_ready(now))
            .map(|j| j.id)
            .collect();

        ready.sort_by(|a, b| {
            let ja = &jobs[a];
            let jb = &jobs[b];
            jb.priority
                .cmp(&ja.priority)
                .then(ja.available_at.cmp(&jb.available_at))
                .then(ja.id.cmp(&jb.id))
        });

        let mut leased = Vec::new();
        for id in ready.into_iter().take(limit) {
            let job = jobs.get_mut(&id).expect("id came from the map");
            job.state = JobState::Leased;
            job.lease_owner = Some(owner.to_string());
            job.lease_expires_at = Some(now + Self::chrono(visibility));
            job.updated_at = now;
            leased.push(job.clone());
        }
        Ok(leased)
    }

    async fn heartbeat(&self, id: Uuid, owner: &str, extension: Duration) -> QueueResult<AckResult> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());

        match jobs.get_mut(&id) {
            Some(job)
                if job.state == JobState::Leased
                    && job.lease_owner.as_deref() == Some(owner) =>
            {
                job.lease_expires_at = Some(now + Self::chrono(clamp_visibility(extension)));
                job.updated_at = now;
                Ok(AckResult::Ok)
            }
            _ => Ok(AckResult::Lost),
        }
    }

    async fn complete(&self, id: Uuid, owner: &str) -> QueueResult<AckResult> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());

        match jobs.get_mut(&id) {
            Some(job)
                if job.state == JobState::Leased
                    && job.lease_owner.as_deref() == Some(owner)
                    && !job.lease_expired(now) =>
            {
                job.state = JobState::Succeeded;
                job.lease_owner = None;
                job.lease_expires_at = None;
                job.updated_at = now;
                Ok(AckResult::Ok)
            }
            _ => Ok(AckResult::Lost),
        }
    }

    async fn fail(
        &self,
        id: Uuid,
        owner: &str,
        error: JobError,
        retry_delay: Option<Duration>,
    ) -> QueueResult<FailResult> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());

        let job = match jobs.get_mut(&id) {
            Some(job)
                if job.state == JobState::Leased
                    && job.lease_owner.as_deref() == Some(owner) =>
            {
                job
            }
            _ => return Ok(FailResult::Lost),
        };

        job.attempts += 1;
        job.last_error = Some(error);
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = now;

        match retry_delay {
            Some(delay) => {
                let available_at = now + Self::chrono(delay);
                job.state = JobState::FailedRetry;
                job.available_at = available_at;
                Ok(FailResult::Retried { available_at })
            }
            None => {
                job.state = JobState::DeadLetter;
                Ok(FailResult::DeadLettered)
            }
        }
    }

    async fn reclaim_expired(&self) -> QueueResult<Vec<Uuid>> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());

        let mut reclaimed = Vec::new();
        for job in jobs.values_mut() {
            if job.lease_expired(now) {
                job.state = JobState::Pending;
                job.lease_owner = None;
                job.lease_expires_at = None;
                job.available_at = now;
                job.updated_at = now;
                reclaimed.push(job.id);
            }
        }
        reclaimed.sort();
        Ok(reclaimed)
    }

    async fn cancel(&self, id: Uuid) -> QueueResult<bool> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());

        match jobs.get_mut(&id) {
            Some(job) if job.state.is_ready_pool() => {
                job.state = JobState::Cancelled;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, id: Uuid) -> QueueResult<Option<Job>> {
        Ok(self.snapshot(id))
    }

    async fn count_leased(&self, job_type: &str) -> QueueResult<i64> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(jobs
            .values()
            .filter(|j| j.job_type == job_type && j.state == JobState::Leased)
            .count() as i64)
    }

    async fn counts(&self) -> QueueResult<Vec<QueueCounts>> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut tally: HashMap<(String, JobState), i64> = HashMap::new();
        for job in jobs.values() {
            *tally.entry((job.job_type.clone(), job.state)).or_default() += 1;
        }
        let mut counts: Vec<QueueCounts> = tally
            .into_iter()
            .map(|((job_type, state), count)| QueueCounts {
                job_type,
                state,
                count,
            })
            .collect();
        counts.sort_by(|a, b| a.job_type.cmp(&b.job_type));
        Ok(counts)
    }

    async fn list_dlq(&self, filter: &DlqFilter, page: Page) -> QueueResult<(Vec<Job>, i64)> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());

        let mut entries: Vec<Job> = jobs
            .values()
            .filter(|j| j.state == JobState::DeadLetter)
            .filter(|j| {
                filter
                    .job_type
                    .as_ref()
                    .map(|t| &j.job_type == t)
                    .unwrap_or(true)
            })
            .filter(|j| filter.since.map(|s| j.updated_at >= s).unwrap_or(true))
            .filter(|j| filter.until.map(|u| j.updated_at <= u).unwrap_or(true))
            .filter(|j| {
                filter
                    .q
                    .as_ref()
                    .map(|q| {
                        j.last_error
                            .as_ref()
                            .map(|e| e.message.contains(q.as_str()))
                            .unwrap_or(false)
                    })
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        // Most recent failures first, id tiebreak for stable paging.
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));

        let total = entries.len() as i64;
        let offset = page.offset.max(0) as usize;
        let limit = page.limit.max(0) as usize;
        let page_entries = entries.into_iter().skip(offset).take(limit).collect();
        Ok((page_entries, total))
    }

    async fn requeue(&self, ids: &[Uuid]) -> QueueResult<RequeueSummary> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());

        let mut summary = RequeueSummary {
            requeued: Vec::new(),
            skipped: Vec::new(),
        };
        for id in ids {
            match jobs.get_mut(id) {
                Some(job) if job.state == JobState::DeadLetter => {
                    job.state = JobState::Pending;
                    job.available_at = now;
                    job.lease_owner = None;
                    job.lease_expires_at = None;
                    job.updated_at = now;
                    summary.requeued.push(*id);
                }
                _ => summary.skipped.push(*id),
            }
        }
        Ok(summary)
    }

    async fn purge(&self, ids: &[Uuid]) -> QueueResult<u64> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());

        let mut purged = 0;
        for id in ids {
            if jobs
                .get(id)
                .map(|j| j.state == JobState::DeadLetter)
                .unwrap_or(false)
            {
                jobs.remove(id);
                purged += 1;
            }
        }
        Ok(purged)
    }

    fn set_known_types(&self, types: HashSet<String>) {
        *self.known_types.write().unwrap_or_else(|e| e.into_inner()) = types;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::clock::ManualClock;
    use crate::kernel::jobs::job::ErrorKind;
    use chrono::Utc;
    use std::sync::Arc;

    fn store() -> (Arc<ManualClock>, MemoryQueueStore) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryQueueStore::new(clock.clone());
        (clock, store)
    }

    fn new_job(job_type: &str) -> NewJob {
        NewJob::builder().job_type(job_type).build()
    }

    #[tokio::test]
    async fn lease_orders_by_priority_then_availability_then_id() {
        let (clock, store) = store();

        let low = store
            .enqueue(NewJob::builder().job_type("sync").priority(1).build())
            .await
            .unwrap();
        let high = store
            .enqueue(NewJob::builder().job_type("sync").priority(5).build())
            .await
            .unwrap();
        clock.advance(ChronoDuration::milliseconds(10));
        let high_later = store
            .enqueue(NewJob::builder().job_type("sync").priority(5).build())
            .await
            .unwrap();

        let leased = store
            .lease("sync", "w1", Duration::from_secs(30), 10)
            .await
            .unwrap();
        let order: Vec<Uuid> = leased.iter().map(|j| j.id).collect();
        assert_eq!(order, vec![high.id, high_later.id, low.id]);
    }

    #[tokio::test]
    async fn heartbeat_from_wrong_owner_is_lost() {
        let (_clock, store) = store();
        let out = store.enqueue(new_job("sync")).await.unwrap();
        store
            .lease("sync", "w1", Duration::from_secs(30), 1)
            .await
            .unwrap();

        let ack = store
            .heartbeat(out.id, "w2", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(ack, AckResult::Lost);
    }

    #[tokio::test]
    async fn complete_after_expiry_is_lost() {
        let (clock, store) = store();
        let out = store.enqueue(new_job("sync")).await.unwrap();
        store
            .lease("sync", "w1", Duration::from_secs(5), 1)
            .await
            .unwrap();

        clock.advance(ChronoDuration::seconds(6));
        let ack = store.complete(out.id, "w1").await.unwrap();
        assert_eq!(ack, AckResult::Lost);
    }

    #[tokio::test]
    async fn fail_without_delay_dead_letters() {
        let (_clock, store) = store();
        let out = store.enqueue(new_job("sync")).await.unwrap();
        store
            .lease("sync", "w1", Duration::from_secs(30), 1)
            .await
            .unwrap();

        let result = store
            .fail(
                out.id,
                "w1",
                JobError::new(ErrorKind::Internal, "boom"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result, FailResult::DeadLettered);

        let job = store.snapshot(out.id).unwrap();
        assert_eq!(job.state, JobState::DeadLetter);
        assert_eq!(job.attempts, 1);
        assert!(job.lease_owner.is_none());
    }

    #[tokio::test]
    async fn reclaim_does_not_touch_attempts() {
        let (clock, store) = store();
        let out = store.enqueue(new_job("sync")).await.unwrap();
        store
            .lease("sync", "w1", Duration::from_secs(5), 1)
            .await
            .unwrap();

        clock.advance(ChronoDuration::seconds(6));
        let reclaimed = store.reclaim_expired().await.unwrap();
        assert_eq!(reclaimed, vec![out.id]);

        let job = store.snapshot(out.id).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.lease_owner.is_none());
        assert!(job.lease_expires_at.is_none());
    }

    #[tokio::test]
    async fn cancel_only_touches_ready_jobs() {
        let (_clock, store) = store();
        let a = store.enqueue(new_job("sync")).await.unwrap();
        let b = store.enqueue(new_job("sync")).await.unwrap();
        let leased = store
            .lease("sync", "w1", Duration::from_secs(30), 1)
            .await
            .unwrap();
        let leased_id = leased[0].id;
        let pending_id = if leased_id == a.id { b.id } else { a.id };

        assert!(store.cancel(pending_id).await.unwrap());
        assert!(!store.cancel(leased_id).await.unwrap());
        assert_eq!(
            store.snapshot(pending_id).unwrap().state,
            JobState::Cancelled
        );
    }
}
