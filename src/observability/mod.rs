//! Observability for swarmwatch.
//!
//! Structured logging through `tracing` and Prometheus metrics served over HTTP.

use crate::config::ObservabilityConfig;
use crate::error::{Result, SwarmwatchError};
use crate::shutdown::ShutdownCoordinator;
use ::tracing::info;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| SwarmwatchError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| SwarmwatchError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Serve `/metrics` and `/health` until shutdown.
pub async fn run_metrics_server(
    config: ObservabilityConfig,
    shutdown: ShutdownCoordinator,
) -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| {
            SwarmwatchError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

    register_metrics();

    let app = axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/health", axum::routing::get(|| async { "OK" }));

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await?;

    Ok(())
}

fn register_metrics() {
    gauge!("swarmwatch_controller_phase").set(0.0);
    counter!("swarmwatch_cycles_total", "outcome" => "stable").absolute(0);
    counter!("swarmwatch_cycles_total", "outcome" => "failover").absolute(0);
    counter!("swarmwatch_cycles_total", "outcome" => "unreachable").absolute(0);
    counter!("swarmwatch_migrations_total", "result" => "migrated").absolute(0);
}

/// Record a finished cycle.
pub fn record_cycle(outcome: &'static str, duration: Duration) {
    counter!("swarmwatch_cycles_total", "outcome" => outcome).increment(1);
    histogram!("swarmwatch_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Record one service's result within a failover cycle.
pub fn record_migration(result: &'static str) {
    counter!("swarmwatch_migrations_total", "result" => result).increment(1);
}

/// 0 while monitoring, 1 while migrating.
pub fn record_phase(phase: u8) {
    gauge!("swarmwatch_controller_phase").set(f64::from(phase));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_cycle("stable", Duration::from_millis(5));
        record_migration("migrated");
        record_phase(1);
    }
}
