//! Common test utilities for integration tests.

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;

use std::time::Duration;
use swarmwatch::config::SwarmwatchConfig;
use swarmwatch::resilience::RetryConfig;

/// Configuration tuned for tests: fast polls, no metrics server, no retry sleeps.
pub fn test_config() -> SwarmwatchConfig {
    let mut config = SwarmwatchConfig::default();
    config.observability.metrics_enabled = false;
    config.controller.poll_interval = Duration::from_millis(100);
    config.controller.cycle_deadline = Duration::from_secs(10);
    config.controller.shutdown_grace = Duration::from_secs(5);
    config.api.call_timeout = Duration::from_secs(5);
    config.retry = RetryConfig::none();
    config
}
