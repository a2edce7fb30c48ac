//! Polling scheduler.
//!
//! Keeps the dispatcher fed without exceeding the per-type and global
//! budgets. Types are visited round-robin every round so one slow type
//! cannot starve the rest; lease requests are per-type and capped at the
//! free slots the dispatcher reports.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::kernel::clock::{Jitter, SharedJitter};
use crate::kernel::events::{names, EventSink, WorkerEvent};

use super::dispatcher::Dispatcher;
use super::queue::QueueStore;

const COMPONENT: &str = "scheduler";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Base poll cadence, jittered ±20% each round.
    pub poll_interval: Duration,
    /// Upper bound for the adaptive backoff while idle.
    pub poll_interval_max: Duration,
    /// Lease duration per type; types without an entry use the default.
    pub visibility_timeouts: HashMap<String, Duration>,
    pub default_visibility_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            poll_interval_max: Duration::from_millis(5000),
            visibility_timeouts: HashMap::new(),
            default_visibility_timeout: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

    pub fn visibility_for(&self, job_type: &str) -> Duration {
        self.visibility_timeouts
            .get(job_type)
            .copied()
            .unwrap_or(self.default_visibility_timeout)
    }
}

pub struct Scheduler {
    store: Arc<dyn QueueStore>,
    dispatcher: Arc<Dispatcher>,
    events: Arc<dyn EventSink>,
    jitter: SharedJitter,
    config: SchedulerConfig,
    job_types: Vec<String>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn QueueStore>,
        dispatcher: Arc<Dispatcher>,
        events: Arc<dyn EventSink>,
        jitter: SharedJitter,
        config: SchedulerConfig,
        job_types: Vec<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            dispatcher,
            events,
            jitter,
            config,
            job_types,
            shutdown,
        }
    }

    /// Run until the shutdown token fires. Stops leasing immediately on
    /// shutdown; jobs already handed to the dispatcher keep running.
    pub async fn run(self) {
        let base = self.config.poll_interval.max(SchedulerConfig::MIN_POLL_INTERVAL);
        let mut idle_backoff = base;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let leased = self.poll_once().await;

            let sleep_for = if leased == 0 {
                // Nothing anywhere: back off up to the configured ceiling.
                idle_backoff = (idle_backoff * 2).min(self.config.poll_interval_max);
                idle_backoff
            } else {
                idle_backoff = base;
                base
            };

            let factor = 1.0 + self.jitter.uniform(-0.2, 0.2);
            let jittered =
                Duration::from_millis((sleep_for.as_millis() as f64 * factor).max(1.0) as u64);

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(jittered) => {}
            }
        }

        tracing::debug!("scheduler stopped");
    }

    /// One round-robin pass over all types. Returns how many jobs were
    /// leased and handed to the dispatcher.
    pub async fn poll_once(&self) -> usize {
        let mut total = 0;

        for job_type in &self.job_types {
            if self.shutdown.is_cancelled() {
                break;
            }

            let capacity = self.dispatcher.free_slots(job_type);
            if capacity == 0 {
                continue;
            }

            let visibility = self.config.visibility_for(job_type);
            let jobs = match self
                .store
                .lease(job_type, self.dispatcher.owner(), visibility, capacity)
                .await
            {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!(job_type = %job_type, error = %e, "lease failed");
                    continue;
                }
            };

            if jobs.is_empty() {
                continue;
            }

            self.events.emit(
                WorkerEvent::new(names::LEASE, COMPONENT, "leased")
                    .meta(serde_json::json!({"job_type": job_type, "count": jobs.len()})),
            );

            total += jobs.len();
            for job in jobs {
                self.dispatcher.dispatch(job);
            }
        }

        total
    }
}
