//! swarmwatch - primary/secondary failover for Docker Swarm services.
//!
//! swarmwatch polls a swarm manager, checks the node labeled as primary, and when that
//! node is down or unschedulable rewrites every service's placement constraints so the
//! scheduler moves them onto nodes labeled as secondary.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Failover Controller                      │
//! │        tick → capture → evaluate → plan → execute            │
//! ├──────────────┬───────────────┬───────────────┬──────────────┤
//! │   Snapshot   │    Health     │   Placement   │  Migration   │
//! │    Reader    │   Evaluator   │    Planner    │   Executor   │
//! ├──────────────┴───────────────┴───────────────┴──────────────┤
//! │          OrchestratorApi: Docker Engine | In-memory          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use swarmwatch::config::SwarmwatchConfig;
//!
//! #[tokio::main]
//! async fn main() -> swarmwatch::Result<()> {
//!     let config = SwarmwatchConfig::development();
//!     swarmwatch::run(config).await
//! }
//! ```

pub mod cli;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod resilience;
pub mod shutdown;
pub mod types;

// Re-exports
pub use error::{Result, SwarmwatchError};
pub use types::*;

use client::{DockerClient, OrchestratorApi};
use cluster::{ControllerStats, FailoverController};
use config::SwarmwatchConfig;
use events::{EventBus, EventBusConfig};
use shutdown::{ShutdownCoordinator, SignalHandler};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run the controller against the configured Docker endpoint until a stop signal.
pub async fn run(config: SwarmwatchConfig) -> Result<()> {
    config.validate()?;
    let api: Arc<dyn OrchestratorApi> = Arc::new(DockerClient::new(&config.api)?);
    let coordinator = ShutdownCoordinator::with_grace(config.controller.shutdown_grace);

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        if let Err(e) = SignalHandler::new(signal_coordinator).run().await {
            error!("Failed to install signal handlers: {}", e);
        }
    });

    run_with(api, config, coordinator).await?;
    Ok(())
}

/// Run the controller against any orchestrator until `coordinator` shuts down.
pub async fn run_with(
    api: Arc<dyn OrchestratorApi>,
    config: SwarmwatchConfig,
    coordinator: ShutdownCoordinator,
) -> Result<ControllerStats> {
    info!(endpoint = %config.api.endpoint, "Starting swarmwatch");

    let mut metrics_handle = None;
    if config.observability.metrics_enabled {
        info!("Starting metrics server on {}", config.observability.metrics_addr);
        let obs_config = config.observability.clone();
        let metrics_shutdown = coordinator.clone();

        metrics_handle = Some(tokio::spawn(async move {
            if let Err(e) = observability::run_metrics_server(obs_config, metrics_shutdown).await {
                error!("Metrics server error: {}", e);
            }
        }));
    }

    let events = EventBus::new(EventBusConfig::default());
    let controller = FailoverController::new(api, &config, events);
    controller.run(coordinator.clone()).await;

    if let Some(handle) = metrics_handle {
        if tokio::time::timeout(coordinator.grace(), handle).await.is_err() {
            warn!("Metrics server did not stop within the grace period");
        }
    }

    let stats = controller.stats();
    info!(
        cycles = stats.cycles,
        migrated = stats.services_migrated,
        failures = stats.migration_failures,
        "swarmwatch shutdown complete"
    );
    Ok(stats)
}
