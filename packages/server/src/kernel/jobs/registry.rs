//! Handler registry.
//!
//! Maps job type strings to typed handlers plus their execution policy
//! (attempt cap, lease duration, default priority, retry profile). Populated
//! by explicit `register` calls during bootstrap and read-only afterwards.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::kernel::clock::{Clock, SharedClock};
use crate::kernel::deps::ServerDeps;

use super::job::{ErrorKind, JobError};
use super::retry::RetryProfileKind;

/// Well-known job types. The registry itself is open; these are the types
/// Harmony registers out of the box.
pub mod job_types {
    pub const SYNC: &str = "sync";
    pub const MATCHING: &str = "matching";
    pub const RETRY: &str = "retry";
    pub const ARTIST_SYNC: &str = "artist_sync";
    pub const WATCHLIST: &str = "watchlist";
}

/// What a handler reports back to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    /// Transient failure; the orchestrator owns the backoff.
    Retryable(JobError),
    /// Permanent failure; straight to the dead-letter queue.
    Fatal(JobError),
}

impl Outcome {
    pub fn retryable(kind: ErrorKind, message: impl Into<String>) -> Self {
        Outcome::Retryable(JobError::new(kind, message))
    }

    pub fn fatal(kind: ErrorKind, message: impl Into<String>) -> Self {
        Outcome::Fatal(JobError::new(kind, message))
    }
}

/// Execution context handed to every handler invocation.
///
/// Handlers must check [`Self::is_cancelled`] at every suspension point and
/// return promptly once cancelled. Returning [`Outcome::Done`] after
/// cancellation is allowed only when the side effect actually completed.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    /// 1-based number of the attempt currently executing.
    pub attempt: i32,
    /// The initial lease expiry. Work past this point will be re-leased.
    pub deadline: DateTime<Utc>,
    pub cancel: CancellationToken,
    pub clock: SharedClock,
}

impl JobContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Remaining budget before the deadline, zero once past it.
    pub fn time_left(&self) -> Duration {
        (self.deadline - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Per-type execution policy declared at registration.
#[derive(Debug, Clone)]
pub struct HandlerSpec {
    pub max_attempts: i32,
    pub visibility_timeout: Duration,
    pub default_priority: i32,
    pub retry_profile: RetryProfileKind,
}

impl Default for HandlerSpec {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            visibility_timeout: Duration::from_secs(60),
            default_priority: 0,
            retry_profile: RetryProfileKind::Download,
        }
    }
}

type BoxedHandler = Box<
    dyn Fn(serde_json::Value, JobContext, Arc<ServerDeps>) -> Pin<Box<dyn Future<Output = Outcome> + Send>>
        + Send
        + Sync,
>;

pub struct Registration {
    pub spec: HandlerSpec,
    handler: BoxedHandler,
}

#[derive(Default)]
pub struct HandlerRegistry {
    registrations: HashMap<&'static str, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Register a typed handler for `job_type`.
    ///
    /// The payload is deserialized into `J` before the handler runs; a
    /// malformed payload is a fatal validation failure, never retried.
    pub fn register<J, F, Fut>(&mut self, job_type: &'static str, spec: HandlerSpec, handler: F)
    where
        J: DeserializeOwned + Send + 'static,
        F: Fn(J, JobContext, Arc<ServerDeps>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |payload, ctx, deps| {
            let handler = handler.clone();
            Box::pin(async move {
                let job: J = match serde_json::from_value(payload) {
                    Ok(job) => job,
                    Err(e) => {
                        return Outcome::fatal(
                            ErrorKind::Validation,
                            format!("malformed payload for {job_type}: {e}"),
                        )
                    }
                };
                handler(job, ctx, deps).await
            })
        });

        self.registrations
            .insert(job_type, Registration { spec, handler: boxed });
    }

    pub fn get(&self, job_type: &str) -> Option<&Registration> {
        self.registrations.get(job_type)
    }

    pub fn spec(&self, job_type: &str) -> Option<&HandlerSpec> {
        self.registrations.get(job_type).map(|r| &r.spec)
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.registrations.contains_key(job_type)
    }

    /// Registered types in deterministic order, for round-robin scheduling
    /// and for the store's known-type validation.
    pub fn job_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.registrations.keys().copied().collect();
        types.sort();
        types
    }

    pub fn known_types(&self) -> HashSet<String> {
        self.registrations.keys().map(|t| t.to_string()).collect()
    }

    /// Invoke the handler for `job_type`. `None` when the type is unknown;
    /// the dispatcher dead-letters those.
    pub fn execute(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        ctx: JobContext,
        deps: Arc<ServerDeps>,
    ) -> Option<Pin<Box<dyn Future<Output = Outcome> + Send>>> {
        self.registrations
            .get(job_type)
            .map(|r| (r.handler)(payload, ctx, deps))
    }
}
