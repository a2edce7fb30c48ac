//! Producer HTTP surface.
//!
//! `POST /jobs` is the generic producer entry point; idempotency keys are
//! the only duplicate protection, exactly as for internal producers.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kernel::jobs::job::{Job, NewJob};
use crate::kernel::jobs::queue::QueueStore;
use crate::server::app::AppState;
use crate::server::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct EnqueueBody {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub priority: Option<i32>,
    pub idempotency_key: Option<String>,
}

#[derive(Serialize)]
pub struct EnqueueResponse {
    pub id: Uuid,
    pub inserted: bool,
}

/// POST /jobs
pub async fn enqueue_handler(
    State(state): State<AppState>,
    Json(body): Json<EnqueueBody>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    // Producers fall back to the configured per-type priority, then to the
    // priority the handler declared at registration.
    let priority = body.priority.unwrap_or_else(|| {
        state
            .default_priorities
            .get(&body.job_type)
            .copied()
            .or_else(|| {
                state
                    .registry
                    .spec(&body.job_type)
                    .map(|spec| spec.default_priority)
            })
            .unwrap_or(0)
    });

    let mut new = NewJob::builder()
        .job_type(body.job_type)
        .payload(body.payload)
        .priority(priority)
        .build();
    new.idempotency_key = body.idempotency_key;

    let outcome = state.deps.queue.enqueue(new).await?;
    Ok(Json(EnqueueResponse {
        id: outcome.id,
        inserted: outcome.inserted,
    }))
}

/// GET /jobs/:id
pub async fn get_job_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    match state.deps.queue.get(id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(ApiError::not_found(format!("job {id} not found"))),
    }
}
