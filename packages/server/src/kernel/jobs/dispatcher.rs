//! Dispatcher / worker pool.
//!
//! Executes handlers for leased jobs under a cancellable context, keeps the
//! lease alive with heartbeats, and commits the outcome to the queue store.
//! Concurrency is bounded twice: a per-type pool semaphore and a global one;
//! a job starts only once both admit it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::kernel::clock::{Clock, SharedClock, SharedJitter};
use crate::kernel::deps::ServerDeps;
use crate::kernel::events::{names, EventSink, WorkerEvent};

use super::job::{ErrorKind, Job, JobError};
use super::queue::{AckResult, FailResult, QueueStore};
use super::registry::{HandlerRegistry, JobContext, Outcome};
use super::retry::{next_delay, RetryDecision, RetryProfile, RetryProfileKind};

const COMPONENT: &str = "dispatcher";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Ceiling on concurrent handler executions across all types.
    pub global_concurrency: usize,
    /// Per-type pool sizes; a type without an entry falls back to the
    /// global ceiling.
    pub pools: HashMap<String, usize>,
    /// Drain window honored on stop.
    pub shutdown_grace: Duration,
    /// Lease owner identity for this dispatcher instance.
    pub owner: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            global_concurrency: 8,
            pools: HashMap::new(),
            shutdown_grace: Duration::from_secs(2),
            owner: format!("dispatcher-{}", Uuid::new_v4()),
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    registry: Arc<HandlerRegistry>,
    deps: Arc<ServerDeps>,
    events: Arc<dyn EventSink>,
    clock: SharedClock,
    jitter: SharedJitter,
    profiles: HashMap<RetryProfileKind, RetryProfile>,
    config: DispatcherConfig,
    global: Arc<Semaphore>,
    pools: HashMap<String, Arc<Semaphore>>,
    /// Cancellation tokens of in-flight jobs, for drain.
    running: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn QueueStore>,
        registry: Arc<HandlerRegistry>,
        deps: Arc<ServerDeps>,
        profiles: HashMap<RetryProfileKind, RetryProfile>,
        config: DispatcherConfig,
    ) -> Self {
        let global = Arc::new(Semaphore::new(config.global_concurrency));
        let mut pools = HashMap::new();
        for job_type in registry.job_types() {
            let size = config
                .pools
                .get(job_type)
                .copied()
                .unwrap_or(config.global_concurrency);
            pools.insert(job_type.to_string(), Arc::new(Semaphore::new(size)));
        }

        Self {
            events: deps.events.clone(),
            clock: deps.clock.clone(),
            jitter: deps.jitter.clone(),
            store,
            registry,
            deps,
            profiles,
            config,
            global,
            pools,
            running: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.config.owner
    }

    /// Slots a new lease round may fill for `job_type` right now.
    pub fn free_slots(&self, job_type: &str) -> usize {
        let pool = match self.pools.get(job_type) {
            Some(pool) => pool.available_permits(),
            None => 0,
        };
        pool.min(self.global.available_permits())
    }

    pub async fn in_flight(&self) -> usize {
        self.running.read().await.len()
    }

    /// Take ownership of a leased job and run it to an outcome. Returns
    /// immediately; execution happens on a spawned task.
    pub fn dispatch(&self, job: Job) {
        if self.shutdown.is_cancelled() {
            // Stop accepting; the lease will expire and be reclaimed.
            return;
        }

        let store = self.store.clone();
        let registry = self.registry.clone();
        let deps = self.deps.clone();
        let events = self.events.clone();
        let clock = self.clock.clone();
        let jitter = self.jitter.clone();
        let profiles = self.profiles.clone();
        let owner = self.config.owner.clone();
        let global = self.global.clone();
        let pool = self.pools.get(&job.job_type).cloned();
        let running = self.running.clone();
        let job_cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            let job_id = job.id;

            // Unknown types never execute; dead-letter them up front.
            let Some(pool) = pool else {
                Self::dead_letter_unknown(&*store, &*events, &owner, &job).await;
                return;
            };
            if !registry.is_registered(&job.job_type) {
                Self::dead_letter_unknown(&*store, &*events, &owner, &job).await;
                return;
            }

            // A job starts only once both semaphores admit it.
            let _global_permit = match global.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let _pool_permit = match pool.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            running.write().await.insert(job_id, job_cancel.clone());

            run_job(
                job,
                store,
                registry,
                deps,
                events,
                clock,
                jitter,
                profiles,
                owner,
                job_cancel,
            )
            .await;

            running.write().await.remove(&job_id);
        });
    }

    async fn dead_letter_unknown(
        store: &dyn QueueStore,
        events: &dyn EventSink,
        owner: &str,
        job: &Job,
    ) {
        let error = JobError::new(
            ErrorKind::Validation,
            format!("unknown job type: {}", job.job_type),
        );
        match store.fail(job.id, owner, error, None).await {
            Ok(FailResult::DeadLettered) => {
                events.emit(
                    WorkerEvent::new(names::DLQ, COMPONENT, "dead_letter")
                        .entity(job.id)
                        .meta(serde_json::json!({"job_type": job.job_type, "reason": "unknown_type"})),
                );
                events.emit(
                    WorkerEvent::new(names::WORKER_JOB, COMPONENT, "dead_letter").entity(job.id),
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "failed to dead-letter unknown job type");
            }
        }
    }

    /// Stop accepting jobs and drain in-flight handlers under cancellation.
    /// Handlers that outlive the grace window are abandoned; their leases
    /// expire and the reclaimer returns the jobs to pending.
    pub async fn drain(&self) {
        self.shutdown.cancel();

        let grace = self.config.shutdown_grace;
        let start = tokio::time::Instant::now();
        loop {
            if self.running.read().await.is_empty() {
                break;
            }
            if start.elapsed() >= grace {
                let abandoned = self.running.read().await.len();
                tracing::warn!(count = abandoned, "drain grace elapsed, abandoning handlers");
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_job(
    job: Job,
    store: Arc<dyn QueueStore>,
    registry: Arc<HandlerRegistry>,
    deps: Arc<ServerDeps>,
    events: Arc<dyn EventSink>,
    clock: SharedClock,
    jitter: SharedJitter,
    profiles: HashMap<RetryProfileKind, RetryProfile>,
    owner: String,
    cancel: CancellationToken,
) {
    let job_id = job.id;
    let job_type = job.job_type.clone();
    let spec = registry
        .spec(&job_type)
        .cloned()
        .expect("registration checked by caller");

    let deadline = job
        .lease_expires_at
        .unwrap_or_else(|| clock.now() + chrono::Duration::seconds(60));

    events.emit(
        WorkerEvent::new(names::DISPATCH, COMPONENT, "started")
            .entity(job_id)
            .meta(serde_json::json!({"job_type": job_type, "attempt": job.attempts + 1})),
    );

    let ctx = JobContext {
        job_id,
        attempt: job.attempts + 1,
        deadline,
        cancel: cancel.clone(),
        clock: clock.clone(),
    };

    // Heartbeat at half the lease duration; a lost heartbeat means another
    // owner holds the job, so the handler is cancelled cooperatively.
    let visibility = spec.visibility_timeout;
    let heartbeat_every = (visibility / 2).max(Duration::from_secs(1));
    let heartbeat_handle = {
        let store = store.clone();
        let events = events.clone();
        let owner = owner.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_every);
            ticker.tick().await; // skip the immediate tick
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match store.heartbeat(job_id, &owner, visibility).await {
                            Ok(AckResult::Ok) => {
                                events.emit(
                                    WorkerEvent::new(names::HEARTBEAT, COMPONENT, "ok")
                                        .entity(job_id),
                                );
                            }
                            Ok(AckResult::Lost) => {
                                events.emit(
                                    WorkerEvent::new(names::HEARTBEAT, COMPONENT, "lost")
                                        .entity(job_id),
                                );
                                cancel.cancel();
                                break;
                            }
                            Err(e) => {
                                tracing::warn!(job_id = %job_id, error = %e, "heartbeat failed");
                            }
                        }
                    }
                }
            }
        })
    };

    let started = tokio::time::Instant::now();
    let handler_future = registry
        .execute(&job_type, job.payload.clone(), ctx, deps)
        .expect("registration checked by caller");

    // A panic that escapes the handler is coerced to a fatal internal error.
    let outcome = tokio::select! {
        result = std::panic::AssertUnwindSafe(handler_future).catch_unwind() => {
            match result {
                Ok(outcome) => Some(outcome),
                Err(_) => Some(Outcome::fatal(ErrorKind::Internal, "handler panicked")),
            }
        }
        _ = cancel.cancelled() => None,
    };

    cancel.cancel();
    let _ = heartbeat_handle.await;

    let duration_ms = started.elapsed().as_millis() as u64;

    let Some(outcome) = outcome else {
        // Cancelled mid-flight: no commit. The lease expires and the
        // reclaimer returns the job to pending with attempts unchanged.
        tracing::debug!(job_id = %job_id, job_type = %job_type, "handler cancelled, leaving lease to expire");
        return;
    };

    // A handler that noticed cancellation itself gets the same treatment:
    // no commit, attempts untouched, lease left to expire.
    if let Outcome::Retryable(err) | Outcome::Fatal(err) = &outcome {
        if err.kind == ErrorKind::Cancelled {
            tracing::debug!(job_id = %job_id, job_type = %job_type, "handler returned cancelled");
            return;
        }
    }

    match outcome {
        Outcome::Done => match store.complete(job_id, &owner).await {
            Ok(AckResult::Ok) => {
                events.emit(
                    WorkerEvent::new(names::COMMIT, COMPONENT, "ok")
                        .entity(job_id)
                        .duration_ms(duration_ms),
                );
            }
            Ok(AckResult::Lost) => {
                events.emit(WorkerEvent::new(names::HEARTBEAT, COMPONENT, "lost").entity(job_id));
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "failed to commit success");
            }
        },
        Outcome::Retryable(error) => {
            let profile = profiles
                .get(&spec.retry_profile)
                .cloned()
                .unwrap_or_default();
            let profile = RetryProfile {
                max_attempts: spec.max_attempts,
                ..profile
            };
            let attempt = job.attempts + 1;

            match next_delay(&profile, attempt, &*jitter) {
                RetryDecision::Delay(delay) => {
                    // Rate-limit hints floor the delay.
                    let delay = error
                        .retry_after_ms()
                        .map(Duration::from_millis)
                        .map_or(delay, |hint| delay.max(hint));

                    match store.fail(job_id, &owner, error, Some(delay)).await {
                        Ok(FailResult::Retried { available_at }) => {
                            events.emit(
                                WorkerEvent::new(names::COMMIT, COMPONENT, "retry")
                                    .entity(job_id)
                                    .duration_ms(duration_ms)
                                    .meta(serde_json::json!({
                                        "attempt": attempt,
                                        "available_at": available_at.to_rfc3339(),
                                    })),
                            );
                        }
                        Ok(FailResult::Lost) => {
                            events.emit(
                                WorkerEvent::new(names::HEARTBEAT, COMPONENT, "lost")
                                    .entity(job_id),
                            );
                        }
                        Ok(FailResult::DeadLettered) => {}
                        Err(e) => {
                            tracing::error!(job_id = %job_id, error = %e, "failed to commit retry");
                        }
                    }
                }
                RetryDecision::Exhausted => {
                    match store.fail(job_id, &owner, error, None).await {
                        Ok(FailResult::DeadLettered) => {
                            events.emit(
                                WorkerEvent::new(names::COMMIT, COMPONENT, "retry")
                                    .entity(job_id)
                                    .duration_ms(duration_ms),
                            );
                            events.emit(
                                WorkerEvent::new(names::WORKER_RETRY_EXHAUSTED, COMPONENT, "exhausted")
                                    .entity(job_id)
                                    .meta(serde_json::json!({
                                        "job_type": job_type,
                                        "attempts": attempt,
                                    })),
                            );
                            events.emit(
                                WorkerEvent::new(names::DLQ, COMPONENT, "dead_letter")
                                    .entity(job_id)
                                    .meta(serde_json::json!({"job_type": job_type})),
                            );
                            events.emit(
                                WorkerEvent::new(names::WORKER_JOB, COMPONENT, "dead_letter")
                                    .entity(job_id),
                            );
                        }
                        Ok(FailResult::Lost) => {
                            events.emit(
                                WorkerEvent::new(names::HEARTBEAT, COMPONENT, "lost")
                                    .entity(job_id),
                            );
                        }
                        Ok(FailResult::Retried { .. }) => {}
                        Err(e) => {
                            tracing::error!(job_id = %job_id, error = %e, "failed to dead-letter");
                        }
                    }
                }
            }
        }
        Outcome::Fatal(error) => match store.fail(job_id, &owner, error, None).await {
            Ok(FailResult::DeadLettered) => {
                events.emit(
                    WorkerEvent::new(names::COMMIT, COMPONENT, "failed")
                        .entity(job_id)
                        .duration_ms(duration_ms),
                );
                events.emit(
                    WorkerEvent::new(names::DLQ, COMPONENT, "dead_letter")
                        .entity(job_id)
                        .meta(serde_json::json!({"job_type": job_type})),
                );
                events.emit(
                    WorkerEvent::new(names::WORKER_JOB, COMPONENT, "dead_letter").entity(job_id),
                );
            }
            Ok(FailResult::Lost) => {
                events.emit(WorkerEvent::new(names::HEARTBEAT, COMPONENT, "lost").entity(job_id));
            }
            Ok(FailResult::Retried { .. }) => {}
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "failed to dead-letter");
            }
        },
    }
}
