// Main entry point for the Harmony backend

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use harmony_core::config::Config;
use harmony_core::domains::build_handler_registry;
use harmony_core::domains::watchlist::PostgresWatchedArtistStore;
use harmony_core::kernel::clock::{SystemClock, ThreadJitter};
use harmony_core::kernel::deps::{ServerDeps, WatchlistPolicy};
use harmony_core::kernel::events::TracingEventSink;
use harmony_core::kernel::jobs::{Orchestrator, PostgresQueueStore};
use harmony_core::kernel::soulseek::SoulseekAdapter;
use harmony_core::kernel::spotify::SpotifyClient;
use harmony_core::kernel::test_dependencies::MockMetadataProvider;
use harmony_core::kernel::traits::MetadataProvider;
use harmony_core::server::{build_app, AppState};
use slskd::{SlskdClient, SlskdOptions};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harmony_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Harmony music-automation backend");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Clock and jitter are the only ambient inputs; everything downstream
    // receives them injected.
    let clock = Arc::new(SystemClock);
    let jitter = Arc::new(ThreadJitter);

    let queue = Arc::new(PostgresQueueStore::new(pool.clone(), clock.clone()));
    let artists = Arc::new(PostgresWatchedArtistStore::new(pool.clone()));

    let slskd_client = SlskdClient::new(SlskdOptions {
        base_url: config.slskd_base_url.clone(),
        api_key: config.slskd_api_key.clone(),
        timeout: Duration::from_secs(30),
    })
    .context("Failed to build slskd client")?;
    let source = Arc::new(SoulseekAdapter::new(slskd_client));

    let metadata: Arc<dyn MetadataProvider> =
        match (&config.spotify_client_id, &config.spotify_client_secret) {
            (Some(id), Some(secret)) => {
                Arc::new(SpotifyClient::new(id.clone(), secret.clone()))
            }
            _ => {
                tracing::warn!("Spotify credentials missing; artist sync will return no albums");
                Arc::new(MockMetadataProvider::new())
            }
        };

    let deps = Arc::new(ServerDeps::new(
        queue,
        artists,
        source,
        metadata,
        clock,
        jitter,
        Arc::new(TracingEventSink),
        WatchlistPolicy {
            cooldown: config.worker.watchlist.cooldown,
            retry_budget_per_artist: config.worker.watchlist.retry_budget_per_artist,
            max_per_tick: config.worker.watchlist.max_per_tick,
            tick_budget: config.worker.watchlist.tick_budget,
        },
    ));

    // Handlers are registered explicitly; the registry is frozen afterwards.
    let registry = Arc::new(build_handler_registry());

    let orchestrator = Orchestrator::start(deps.clone(), registry.clone(), &config.worker)
        .context("Failed to start orchestrator")?;

    // Build application
    let state = AppState::new(deps, registry, &config.worker, Some(pool));
    let app = build_app(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received shutdown signal");
        })
        .await
        .context("Server error")?;

    // Reverse-order teardown with the configured grace window.
    orchestrator.stop().await;

    Ok(())
}
