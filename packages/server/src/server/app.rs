//! Application setup and router assembly.

use std::collections::HashMap;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::WorkerConfig;
use crate::kernel::deps::ServerDeps;
use crate::kernel::jobs::dlq::DlqManager;
use crate::kernel::jobs::registry::HandlerRegistry;
use crate::server::routes::{
    enqueue_handler, get_job_handler, health_handler, list_dlq_handler, purge_handler,
    requeue_handler,
};

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<ServerDeps>,
    pub dlq: DlqManager,
    pub registry: Arc<HandlerRegistry>,
    /// Present when running on Postgres; the in-memory store has no pool.
    pub db_pool: Option<PgPool>,
    pub default_priorities: HashMap<String, i32>,
    pub workers_enabled: bool,
}

impl AppState {
    pub fn new(
        deps: Arc<ServerDeps>,
        registry: Arc<HandlerRegistry>,
        config: &WorkerConfig,
        db_pool: Option<PgPool>,
    ) -> Self {
        let dlq = DlqManager::new(deps.queue.clone(), deps.events.clone(), config.dlq.clone());
        Self {
            deps,
            dlq,
            registry,
            db_pool,
            default_priorities: config.priorities.clone(),
            workers_enabled: config.workers_enabled,
        }
    }
}

/// Build the axum application.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/jobs", post(enqueue_handler))
        .route("/jobs/:id", get(get_job_handler))
        .route("/dlq", get(list_dlq_handler))
        .route("/dlq/requeue", post(requeue_handler))
        .route("/dlq/purge", post(purge_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
