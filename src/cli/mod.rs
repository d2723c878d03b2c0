//! Command-line interface for swarmwatch.

use crate::config::humantime_serde::parse_duration;
use crate::config::SwarmwatchConfig;
use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// swarmwatch - fail Docker Swarm services over from a primary node to a secondary.
#[derive(Parser, Debug)]
#[command(name = "swarmwatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (JSON)
    #[arg(short, long, global = true, env = "SWARMWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, env = "SWARMWATCH_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Docker Engine API endpoint, e.g. unix:///var/run/docker.sock or http://manager:2375
    #[arg(short, long, global = true, env = "SWARMWATCH_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Time between health checks, e.g. 5s or 500ms
    #[arg(long, global = true, env = "SWARMWATCH_POLL_INTERVAL", value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "SWARMWATCH_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the failover controller until stopped
    Run,

    /// Evaluate the cluster once and print what failover would do, without applying it
    Check,

    /// Print nodes with their role and health
    Status,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Load the config file (or defaults) and apply command-line overrides.
    pub fn load_config(&self) -> Result<SwarmwatchConfig> {
        let mut config = match &self.config {
            Some(path) => SwarmwatchConfig::from_file(path)?,
            None => SwarmwatchConfig::default(),
        };

        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.api.endpoint = endpoint.clone();
        }
        if let Some(interval) = self.poll_interval {
            config.controller.poll_interval = interval;
        }
        if self.json_logs {
            config.observability.json_logs = true;
        }

        config.validate()?;
        Ok(config)
    }
}
