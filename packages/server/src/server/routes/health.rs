use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::kernel::jobs::queue::QueueStore;
use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: DatabaseHealth,
    queue: QueueHealth,
    workers_enabled: bool,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct QueueHealth {
    status: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    counts: Vec<QueueCountEntry>,
}

#[derive(Serialize)]
pub struct QueueCountEntry {
    job_type: String,
    state: String,
    count: i64,
}

/// Health check endpoint
///
/// Checks:
/// - Database connectivity (when running on Postgres)
/// - Queue store responsiveness, with per-state job counts
///
/// Returns 200 OK if all systems are healthy, 503 Service Unavailable otherwise.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_health = match &state.db_pool {
        Some(pool) => {
            match tokio::time::timeout(
                std::time::Duration::from_secs(5),
                sqlx::query("SELECT 1").execute(pool),
            )
            .await
            {
                Ok(Ok(_)) => DatabaseHealth {
                    status: "ok".to_string(),
                    error: None,
                },
                Ok(Err(e)) => DatabaseHealth {
                    status: "error".to_string(),
                    error: Some(format!("Query failed: {}", e)),
                },
                Err(_) => DatabaseHealth {
                    status: "error".to_string(),
                    error: Some("Query timeout (>5s)".to_string()),
                },
            }
        }
        None => DatabaseHealth {
            status: "in-memory".to_string(),
            error: None,
        },
    };

    let queue_health = match state.deps.queue.counts().await {
        Ok(counts) => QueueHealth {
            status: "ok".to_string(),
            counts: counts
                .into_iter()
                .map(|c| QueueCountEntry {
                    job_type: c.job_type,
                    state: c.state.as_str().to_string(),
                    count: c.count,
                })
                .collect(),
        },
        Err(e) => QueueHealth {
            status: format!("error: {e}"),
            counts: Vec::new(),
        },
    };

    let is_healthy = db_health.status != "error" && queue_health.status == "ok";

    let response = HealthResponse {
        status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
        database: db_health,
        queue: queue_health,
        workers_enabled: state.workers_enabled,
    };

    let code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}
