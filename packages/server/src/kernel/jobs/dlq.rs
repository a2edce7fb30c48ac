//! Dead-letter queue manager.
//!
//! Operator-facing window into failure: paged listing, bounded requeue and
//! bounded purge. Requeue preserves `attempts` and `last_error`; purge is
//! destructive and always logged.

use std::sync::Arc;

use uuid::Uuid;

use crate::kernel::events::{names, EventSink, WorkerEvent};

use super::job::Job;
use super::queue::{DlqFilter, Page, QueueError, QueueResult, QueueStore, RequeueSummary};

const COMPONENT: &str = "dlq";

#[derive(Debug, Clone)]
pub struct DlqConfig {
    pub page_size_default: i64,
    pub page_size_max: i64,
    pub requeue_limit: usize,
    pub purge_limit: usize,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            page_size_default: 25,
            page_size_max: 100,
            requeue_limit: 500,
            purge_limit: 1000,
        }
    }
}

#[derive(Clone)]
pub struct DlqManager {
    store: Arc<dyn QueueStore>,
    events: Arc<dyn EventSink>,
    config: DlqConfig,
}

impl DlqManager {
    pub fn new(store: Arc<dyn QueueStore>, events: Arc<dyn EventSink>, config: DlqConfig) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    pub fn config(&self) -> &DlqConfig {
        &self.config
    }

    /// Page through dead-lettered jobs. A missing limit takes the default;
    /// an oversized one is clamped to the maximum.
    pub async fn list(
        &self,
        filter: &DlqFilter,
        offset: i64,
        limit: Option<i64>,
    ) -> QueueResult<(Vec<Job>, i64)> {
        let limit = limit
            .unwrap_or(self.config.page_size_default)
            .clamp(1, self.config.page_size_max);
        let page = Page {
            offset: offset.max(0),
            limit,
        };
        self.store.list_dlq(filter, page).await
    }

    /// Return the given DLQ jobs to the pending pool. Ids not currently
    /// dead-lettered are skipped, so repeating a requeue is a no-op.
    pub async fn requeue(&self, ids: &[Uuid]) -> QueueResult<RequeueSummary> {
        if ids.len() > self.config.requeue_limit {
            return Err(QueueError::Validation(format!(
                "requeue batch of {} exceeds limit {}",
                ids.len(),
                self.config.requeue_limit
            )));
        }

        let summary = self.store.requeue(ids).await?;
        for id in &summary.requeued {
            self.events.emit(
                WorkerEvent::new(names::WORKER_JOB, COMPONENT, "requeued").entity(id),
            );
        }
        Ok(summary)
    }

    /// Delete the given DLQ jobs outright.
    pub async fn purge(&self, ids: &[Uuid]) -> QueueResult<u64> {
        if ids.len() > self.config.purge_limit {
            return Err(QueueError::Validation(format!(
                "purge batch of {} exceeds limit {}",
                ids.len(),
                self.config.purge_limit
            )));
        }

        let purged = self.store.purge(ids).await?;
        if purged > 0 {
            self.events.emit(
                WorkerEvent::new(names::WORKER_JOB, COMPONENT, "purged")
                    .meta(serde_json::json!({"count": purged})),
            );
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::clock::ManualClock;
    use crate::kernel::events::CapturingEventSink;
    use crate::kernel::jobs::job::{ErrorKind, JobError, JobState, NewJob};
    use crate::kernel::jobs::memory::MemoryQueueStore;
    use chrono::Utc;
    use std::time::Duration;

    async fn dead_letter_one(store: &MemoryQueueStore) -> Uuid {
        let out = store
            .enqueue(NewJob::builder().job_type("sync").build())
            .await
            .unwrap();
        store
            .lease("sync", "w1", Duration::from_secs(30), 1)
            .await
            .unwrap();
        store
            .fail(out.id, "w1", JobError::new(ErrorKind::Internal, "boom"), None)
            .await
            .unwrap();
        out.id
    }

    fn manager(store: Arc<MemoryQueueStore>) -> (Arc<CapturingEventSink>, DlqManager) {
        let sink = Arc::new(CapturingEventSink::new());
        let manager = DlqManager::new(store, sink.clone(), DlqConfig::default());
        (sink, manager)
    }

    #[tokio::test]
    async fn list_clamps_limit_to_max() {
        let store = Arc::new(MemoryQueueStore::new(Arc::new(ManualClock::new(Utc::now()))));
        for _ in 0..3 {
            dead_letter_one(&store).await;
        }
        let (_sink, manager) = manager(store);

        let (entries, total) = manager
            .list(&DlqFilter::default(), 0, Some(100_000))
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn requeue_is_idempotent_and_logged() {
        let store = Arc::new(MemoryQueueStore::new(Arc::new(ManualClock::new(Utc::now()))));
        let id = dead_letter_one(&store).await;
        let (sink, manager) = manager(store.clone());

        let first = manager.requeue(&[id]).await.unwrap();
        assert_eq!(first.requeued, vec![id]);
        assert!(first.skipped.is_empty());
        assert_eq!(store.snapshot(id).unwrap().state, JobState::Pending);
        // Attempts and last_error survive the requeue.
        assert_eq!(store.snapshot(id).unwrap().attempts, 1);
        assert!(store.snapshot(id).unwrap().last_error.is_some());

        let second = manager.requeue(&[id]).await.unwrap();
        assert!(second.requeued.is_empty());
        assert_eq!(second.skipped, vec![id]);

        assert_eq!(sink.count(names::WORKER_JOB, "requeued"), 1);
    }

    #[tokio::test]
    async fn oversized_batches_are_rejected() {
        let store = Arc::new(MemoryQueueStore::new(Arc::new(ManualClock::new(Utc::now()))));
        let (_sink, manager) = manager(store);

        let ids: Vec<Uuid> = (0..501).map(|_| Uuid::new_v4()).collect();
        assert!(matches!(
            manager.requeue(&ids).await,
            Err(QueueError::Validation(_))
        ));

        let ids: Vec<Uuid> = (0..1001).map(|_| Uuid::new_v4()).collect();
        assert!(matches!(
            manager.purge(&ids).await,
            Err(QueueError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn purge_removes_rows_and_logs() {
        let store = Arc::new(MemoryQueueStore::new(Arc::new(ManualClock::new(Utc::now()))));
        let id = dead_letter_one(&store).await;
        let (sink, manager) = manager(store.clone());

        let purged = manager.purge(&[id]).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.snapshot(id).is_none());
        assert_eq!(sink.count(names::WORKER_JOB, "purged"), 1);
    }
}
