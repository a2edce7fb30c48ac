//! Lease-expiry reclamation.
//!
//! A crashed or partitioned dispatcher leaves jobs `leased` past their
//! expiry. This task returns them to `pending` without incrementing
//! `attempts`: the attempt was never observed to finish, and counting it
//! would conflate crashes with handler errors.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::kernel::events::{names, EventSink, WorkerEvent};

use super::queue::QueueStore;

const COMPONENT: &str = "reclaimer";

pub struct Reclaimer {
    store: Arc<dyn QueueStore>,
    events: Arc<dyn EventSink>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl Reclaimer {
    pub fn new(
        store: Arc<dyn QueueStore>,
        events: Arc<dyn EventSink>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            events,
            poll_interval,
            shutdown,
        }
    }

    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.tick().await;
                }
            }
        }
        tracing::debug!("reclaimer stopped");
    }

    /// One reclamation pass. One event per reclaimed job.
    pub async fn tick(&self) {
        match self.store.reclaim_expired().await {
            Ok(ids) => {
                for id in ids {
                    self.events.emit(
                        WorkerEvent::new(names::LEASE, COMPONENT, "reclaimed").entity(id),
                    );
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "lease reclamation failed");
            }
        }
    }
}
