//! Job model for the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Leased,
    Succeeded,
    /// Failed an attempt; waits for `available_at` before re-entering the
    /// pending pool.
    FailedRetry,
    DeadLetter,
    Cancelled,
}

impl JobState {
    /// Terminal states never transition again without an operator requeue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::DeadLetter | JobState::Cancelled
        )
    }

    /// States eligible for leasing once `available_at` has passed.
    pub fn is_ready_pool(&self) -> bool {
        matches!(self, JobState::Pending | JobState::FailedRetry)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Leased => "leased",
            JobState::Succeeded => "succeeded",
            JobState::FailedRetry => "failed_retry",
            JobState::DeadLetter => "dead_letter",
            JobState::Cancelled => "cancelled",
        }
    }
}

/// Error classification. The kind decides retry behavior; the dispatcher
/// never looks at messages. Stored inside the `last_error` jsonb, so the
/// serde names are the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "DEPENDENCY_ERROR")]
    Dependency,
    #[serde(rename = "RATE_LIMITED")]
    RateLimited,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl ErrorKind {
    /// Whether a failure of this kind is eligible for backoff and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Dependency | ErrorKind::RateLimited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Dependency => "DEPENDENCY_ERROR",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Internal => "INTERNAL_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

/// Structured record of the most recent failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Retry-after hint in milliseconds, if the upstream supplied one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.meta
            .as_ref()
            .and_then(|m| m.get("retry_after_ms"))
            .and_then(|v| v.as_u64())
    }
}

// ============================================================================
// Job model
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub job_type: String,

    /// Opaque handler payload. The orchestrator only ever reads the optional
    /// `idempotency_key` subfield out of it, via [`NewJob`].
    #[builder(default = serde_json::Value::Null)]
    pub payload: serde_json::Value,

    /// Higher is served earlier within a type.
    #[builder(default = 0)]
    pub priority: i32,

    #[builder(default)]
    pub state: JobState,

    /// Lease→outcome cycles that did not succeed. Never decreases.
    #[builder(default = 0)]
    pub attempts: i32,

    /// Earliest instant the job may be leased.
    pub available_at: DateTime<Utc>,

    #[builder(default, setter(strip_option))]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub lease_owner: Option<String>,

    #[builder(default, setter(strip_option))]
    pub last_error: Option<JobError>,

    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the scheduler may lease this job at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state.is_ready_pool() && self.available_at <= now
    }

    /// Whether the lease held on this job has lapsed at `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Leased
            && self
                .lease_expires_at
                .map(|expiry| expiry <= now)
                .unwrap_or(true)
    }
}

/// An enqueue request. Producers build one of these; the store owns the rest
/// of the row.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewJob {
    pub job_type: String,
    #[builder(default = serde_json::Value::Null)]
    pub payload: serde_json::Value,
    #[builder(default = 0)]
    pub priority: i32,
    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,
    /// Defer the job; defaults to immediately available.
    #[builder(default, setter(strip_option))]
    pub available_at: Option<DateTime<Utc>>,
}
