//! Orchestrator lifecycle.
//!
//! Wires the components together in dependency order (queue store →
//! registry → dispatcher → scheduler → watchlist timer), emits the
//! `worker.config` startup summary, and tears everything down in reverse on
//! stop: the watchlist timer and scheduler stop producing and leasing first,
//! then the dispatcher drains under the grace window.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::kernel::deps::ServerDeps;
use crate::kernel::events::{names, EventSink, WorkerEvent};

use super::dispatcher::{Dispatcher, DispatcherConfig};
use super::queue::QueueStore;
use super::reclaimer::Reclaimer;
use super::registry::HandlerRegistry;
use super::scheduler::{Scheduler, SchedulerConfig};
use super::watchlist::{WatchlistConfig, WatchlistTimer};

const COMPONENT: &str = "bootstrap";

pub struct Orchestrator {
    dispatcher: Arc<Dispatcher>,
    watchlist_token: CancellationToken,
    scheduler_token: CancellationToken,
    reclaimer_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    workers_enabled: bool,
}

impl Orchestrator {
    /// Start all orchestrator components. With the kill switch off
    /// (`workers_enabled = false`) nothing is spawned and only queue store
    /// reads remain available.
    pub fn start(
        deps: Arc<ServerDeps>,
        registry: Arc<HandlerRegistry>,
        config: &WorkerConfig,
    ) -> Result<Self> {
        // Producers may only enqueue types a handler exists for.
        deps.queue.set_known_types(registry.known_types());

        deps.events.emit(
            WorkerEvent::new(names::WORKER_CONFIG, COMPONENT, "ok").meta(config.summary()),
        );

        let dispatcher = Arc::new(Dispatcher::new(
            deps.queue.clone(),
            registry.clone(),
            deps.clone(),
            config.retry_profiles.clone(),
            DispatcherConfig {
                global_concurrency: config.global_concurrency,
                pools: config.pools.clone(),
                shutdown_grace: config.shutdown_grace,
                ..DispatcherConfig::default()
            },
        ));

        let mut orchestrator = Self {
            dispatcher,
            watchlist_token: CancellationToken::new(),
            scheduler_token: CancellationToken::new(),
            reclaimer_token: CancellationToken::new(),
            handles: Vec::new(),
            workers_enabled: config.workers_enabled,
        };

        if !config.workers_enabled {
            tracing::warn!("workers disabled by kill switch; queue store is read-only");
            return Ok(orchestrator);
        }

        let reclaimer = Reclaimer::new(
            deps.queue.clone(),
            deps.events.clone(),
            config.poll_interval,
            orchestrator.reclaimer_token.clone(),
        );
        orchestrator.handles.push(tokio::spawn(reclaimer.run()));

        let scheduler = Scheduler::new(
            deps.queue.clone(),
            orchestrator.dispatcher.clone(),
            deps.events.clone(),
            deps.jitter.clone(),
            SchedulerConfig {
                poll_interval: config.poll_interval,
                poll_interval_max: config.poll_interval_max,
                visibility_timeouts: config.visibility_timeouts.clone(),
                default_visibility_timeout: config.default_visibility_timeout,
            },
            registry.job_types().iter().map(|t| t.to_string()).collect(),
            orchestrator.scheduler_token.clone(),
        );
        orchestrator.handles.push(tokio::spawn(scheduler.run()));

        let timer = WatchlistTimer::new(
            deps.artists.clone(),
            deps.queue.clone(),
            deps.clock.clone(),
            deps.events.clone(),
            WatchlistConfig {
                interval: config.watchlist.interval,
                tick_budget: config.watchlist.tick_budget,
                max_per_tick: config.watchlist.max_per_tick,
            },
            orchestrator.watchlist_token.clone(),
        );
        orchestrator.handles.push(tokio::spawn(timer.run()));

        tracing::info!(
            job_types = ?registry.job_types(),
            workers_enabled = config.workers_enabled,
            "orchestrator started"
        );
        Ok(orchestrator)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn workers_enabled(&self) -> bool {
        self.workers_enabled
    }

    /// Graceful shutdown, reverse of the startup order. Jobs whose handlers
    /// do not finish inside the grace window are left to lease expiry.
    pub async fn stop(self) {
        self.watchlist_token.cancel();
        self.scheduler_token.cancel();
        self.dispatcher.drain().await;
        self.reclaimer_token.cancel();

        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("orchestrator stopped");
    }
}
