//! DLQ HTTP surface.
//!
//! Thin handlers over [`DlqManager`]; all semantics live there. Errors use
//! the envelope `{ok:false, error:{code, message}}`.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kernel::jobs::job::Job;
use crate::kernel::jobs::queue::DlqFilter;
use crate::server::app::AppState;
use crate::server::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct DlqListParams {
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub q: Option<String>,
    #[serde(default)]
    pub offset: i64,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct DlqListResponse {
    pub entries: Vec<Job>,
    pub total: i64,
}

/// GET /dlq
pub async fn list_dlq_handler(
    State(state): State<AppState>,
    Query(params): Query<DlqListParams>,
) -> Result<Json<DlqListResponse>, ApiError> {
    let filter = DlqFilter {
        job_type: params.job_type,
        since: params.since,
        until: params.until,
        q: params.q,
    };

    let (entries, total) = state.dlq.list(&filter, params.offset, params.limit).await?;
    Ok(Json(DlqListResponse { entries, total }))
}

#[derive(Debug, Deserialize)]
pub struct IdsBody {
    pub ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct RequeueResponse {
    pub requeued: usize,
    pub skipped: usize,
}

/// POST /dlq/requeue
pub async fn requeue_handler(
    State(state): State<AppState>,
    Json(body): Json<IdsBody>,
) -> Result<Json<RequeueResponse>, ApiError> {
    let summary = state.dlq.requeue(&body.ids).await?;
    Ok(Json(RequeueResponse {
        requeued: summary.requeued.len(),
        skipped: summary.skipped.len(),
    }))
}

#[derive(Serialize)]
pub struct PurgeResponse {
    pub purged: u64,
}

/// POST /dlq/purge
pub async fn purge_handler(
    State(state): State<AppState>,
    Json(body): Json<IdsBody>,
) -> Result<Json<PurgeResponse>, ApiError> {
    let purged = state.dlq.purge(&body.ids).await?;
    Ok(Json(PurgeResponse { purged }))
}
