//! Configuration module for swarmwatch.

use crate::error::{Result, SwarmwatchError};
use crate::resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a swarmwatch controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmwatchConfig {
    /// Orchestration API connection.
    pub api: ApiConfig,
    /// Node and service label vocabulary.
    pub labels: LabelConfig,
    /// Control loop timing.
    pub controller: ControllerConfig,
    /// Retry policy for transient API failures during migration.
    pub retry: RetryConfig,
    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl SwarmwatchConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SwarmwatchError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            SwarmwatchError::Config(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        Endpoint::parse(&self.api.endpoint)?;

        if self.api.call_timeout.is_zero() {
            return Err(SwarmwatchError::InvalidConfig {
                field: "api.call_timeout".to_string(),
                reason: "Call timeout must be non-zero".to_string(),
            });
        }

        if self.controller.poll_interval.is_zero() {
            return Err(SwarmwatchError::InvalidConfig {
                field: "controller.poll_interval".to_string(),
                reason: "Poll interval must be non-zero".to_string(),
            });
        }

        if self.controller.cycle_deadline < self.api.call_timeout {
            return Err(SwarmwatchError::InvalidConfig {
                field: "controller.cycle_deadline".to_string(),
                reason: "Cycle deadline must be at least one call timeout".to_string(),
            });
        }

        if self.controller.max_concurrent_migrations == 0 {
            return Err(SwarmwatchError::InvalidConfig {
                field: "controller.max_concurrent_migrations".to_string(),
                reason: "At least one migration must be allowed".to_string(),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(SwarmwatchError::InvalidConfig {
                field: "retry.max_attempts".to_string(),
                reason: "At least one attempt is required".to_string(),
            });
        }

        self.labels.validate()
    }

    /// Create a configuration for a local swarm with short timings.
    pub fn development() -> Self {
        Self {
            api: ApiConfig {
                endpoint: "http://127.0.0.1:2375".to_string(),
                connect_timeout: Duration::from_secs(1),
                call_timeout: Duration::from_secs(2),
            },
            labels: LabelConfig::default(),
            controller: ControllerConfig {
                poll_interval: Duration::from_secs(2),
                cycle_deadline: Duration::from_secs(10),
                shutdown_grace: Duration::from_secs(5),
                max_concurrent_migrations: 4,
                migration_policy: MigrationPolicy::SkipSatisfied,
            },
            retry: RetryConfig::quick(),
            observability: ObservabilityConfig {
                metrics_enabled: false,
                log_level: "debug".to_string(),
                ..Default::default()
            },
        }
    }
}

/// Orchestration API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Docker Engine API endpoint: `unix:///path/to/docker.sock`, `tcp://host:port`
    /// or an `http(s)://` base URL.
    pub endpoint: String,
    /// Connection timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Per-call timeout, applied to every API request.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:2375".to_string(),
            connect_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Where the Docker Engine API listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// HTTP base URL without a trailing slash.
    Tcp(String),
    /// Path of a Unix domain socket.
    Unix(PathBuf),
}

impl Endpoint {
    pub fn parse(endpoint: &str) -> Result<Self> {
        let invalid = |reason: &str| SwarmwatchError::InvalidConfig {
            field: "api.endpoint".to_string(),
            reason: reason.to_string(),
        };

        if let Some(path) = endpoint.strip_prefix("unix://") {
            if !path.starts_with('/') {
                return Err(invalid("Socket path must be absolute, e.g. unix:///var/run/docker.sock"));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        // Docker's own notation for a plain TCP daemon.
        let url = match endpoint.strip_prefix("tcp://") {
            Some(rest) => format!("http://{}", rest),
            None => endpoint.to_string(),
        };
        let host = url
            .strip_prefix("http://")
            .or_else(|| url.strip_prefix("https://"))
            .ok_or_else(|| {
                invalid("Endpoint must be a unix://, tcp://, http:// or https:// URL")
            })?;
        if host.trim_matches('/').is_empty() {
            return Err(invalid("Endpoint has no host"));
        }

        Ok(Endpoint::Tcp(url.trim_end_matches('/').to_string()))
    }
}

/// Label vocabulary used to classify nodes and steer services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Node label key carrying the role.
    pub role_key: String,
    /// Role value of the preferred node.
    pub primary: String,
    /// Role value of the failover node.
    pub secondary: String,
    /// Service label naming a different failover role for that service.
    pub target_override: String,
    /// Service label that opts a service out of failover when set to "false".
    pub opt_out: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            role_key: "type".to_string(),
            primary: "primary".to_string(),
            secondary: "secondary".to_string(),
            target_override: "swarmwatch.failover.target".to_string(),
            opt_out: "swarmwatch.failover.enabled".to_string(),
        }
    }
}

impl LabelConfig {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("labels.role_key", &self.role_key),
            ("labels.primary", &self.primary),
            ("labels.secondary", &self.secondary),
        ] {
            if value.trim().is_empty() {
                return Err(SwarmwatchError::InvalidConfig {
                    field: field.to_string(),
                    reason: "Label must not be empty".to_string(),
                });
            }
        }

        if self.primary == self.secondary {
            return Err(SwarmwatchError::InvalidConfig {
                field: "labels.secondary".to_string(),
                reason: "Primary and secondary labels must differ".to_string(),
            });
        }

        Ok(())
    }

    /// The role a node plays, if its role label is one of the known values.
    pub fn classify(&self, node: &crate::types::Node) -> Option<NodeClass> {
        match node.label(&self.role_key) {
            Some(v) if v == self.primary => Some(NodeClass::Primary),
            Some(v) if v == self.secondary => Some(NodeClass::Secondary),
            _ => None,
        }
    }
}

/// Failover role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeClass {
    Primary,
    Secondary,
}

/// What to do with services that already sit on the failover target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPolicy {
    /// Leave satisfied services alone at planning time.
    #[default]
    SkipSatisfied,
    /// Submit every service to the executor each unhealthy cycle.
    ReapplyEveryCycle,
}

/// Control loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Time between health checks.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Ceiling on the duration of one cycle.
    #[serde(with = "humantime_serde")]
    pub cycle_deadline: Duration,
    /// How long in-flight migrations may drain after a stop signal.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
    /// Services migrated in parallel within one cycle.
    pub max_concurrent_migrations: usize,
    /// Handling of already-migrated services.
    #[serde(default)]
    pub migration_policy: MigrationPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            cycle_deadline: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
            max_concurrent_migrations: 8,
            migration_policy: MigrationPolicy::SkipSatisfied,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.
    pub metrics_enabled: bool,
    /// Metrics bind address.
    pub metrics_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "250ms", "5s", "2m" or a bare millisecond count.
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Node;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SwarmwatchConfig::default();
        assert_eq!(config.controller.poll_interval, Duration::from_secs(5));
        assert_eq!(config.labels.primary, "primary");
        assert_eq!(config.labels.secondary, "secondary");
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_config() {
        let config = SwarmwatchConfig::development();
        assert!(!config.observability.metrics_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_identical_labels() {
        let mut config = SwarmwatchConfig::default();
        config.labels.secondary = "primary".to_string();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, SwarmwatchError::InvalidConfig { ref field, .. } if field == "labels.secondary"));
    }

    #[test]
    fn test_validate_rejects_short_deadline() {
        let mut config = SwarmwatchConfig::default();
        config.controller.cycle_deadline = Duration::from_millis(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!(
            Endpoint::parse("unix:///var/run/docker.sock").unwrap(),
            Endpoint::Unix(PathBuf::from("/var/run/docker.sock"))
        );
        assert_eq!(
            Endpoint::parse("tcp://manager:2375").unwrap(),
            Endpoint::Tcp("http://manager:2375".to_string())
        );
        assert_eq!(
            Endpoint::parse("https://manager:2376/").unwrap(),
            Endpoint::Tcp("https://manager:2376".to_string())
        );

        assert!(Endpoint::parse("unix://docker.sock").is_err());
        assert!(Endpoint::parse("http://").is_err());
        assert!(Endpoint::parse("ftp://manager").is_err());
        assert!(Endpoint::parse("manager:2375").is_err());
    }

    #[test]
    fn test_validate_accepts_unix_socket() {
        let mut config = SwarmwatchConfig::default();
        config.api.endpoint = "unix:///var/run/docker.sock".to_string();
        assert!(config.validate().is_ok());

        config.api.endpoint = "ftp://manager".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SwarmwatchError::InvalidConfig { ref field, .. } if field == "api.endpoint"));
    }

    #[test]
    fn test_from_file_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "api": {{ "endpoint": "http://swarm-manager:2375", "connect_timeout": "1s", "call_timeout": "750ms" }},
                "controller": {{ "poll_interval": "10s", "cycle_deadline": "1m", "shutdown_grace": "5s", "max_concurrent_migrations": 2 }},
                "labels": {{ "role_key": "tier", "primary": "gold", "secondary": "silver",
                             "target_override": "failover.target", "opt_out": "failover.enabled" }}
            }}"#
        )
        .unwrap();

        let config = SwarmwatchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.api.call_timeout, Duration::from_millis(750));
        assert_eq!(config.controller.cycle_deadline, Duration::from_secs(60));
        assert_eq!(config.controller.migration_policy, MigrationPolicy::SkipSatisfied);
        assert_eq!(config.labels.role_key, "tier");
        // Sections left out fall back to defaults.
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_classify_nodes() {
        let labels = LabelConfig::default();
        let primary = Node::new("a", "a").with_label("type", "primary");
        let secondary = Node::new("b", "b").with_label("type", "secondary");
        let other = Node::new("c", "c").with_label("type", "edge");
        let bare = Node::new("d", "d");

        assert_eq!(labels.classify(&primary), Some(NodeClass::Primary));
        assert_eq!(labels.classify(&secondary), Some(NodeClass::Secondary));
        assert_eq!(labels.classify(&other), None);
        assert_eq!(labels.classify(&bare), None);
    }

    #[test]
    fn test_parse_duration() {
        use humantime_serde::parse_duration;
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1500").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("soon").is_err());
    }
}
