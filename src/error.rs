//! Error types for swarmwatch.
//!
//! This module provides the crate-wide error type [`SwarmwatchError`] along with a
//! [`Result`] alias. Per-service failures of the planner and executor have their own
//! enums ([`crate::cluster::PlanError`], [`crate::cluster::ApplyError`]) because the
//! controller records them as outcomes instead of propagating them.
//!
//! # Example
//!
//! ```rust
//! use swarmwatch::error::SwarmwatchError;
//!
//! let err = SwarmwatchError::Timeout(2000);
//! assert!(err.is_retryable());
//!
//! let err = SwarmwatchError::Conflict("update out of sequence".into());
//! assert!(!err.is_retryable());
//! ```

use thiserror::Error;

/// Main error type for swarmwatch operations.
#[derive(Error, Debug)]
pub enum SwarmwatchError {
    // Orchestration API errors
    #[error("Cluster unreachable: {0}")]
    ClusterUnreachable(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Orchestration API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Revision conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed API response: {0}")]
    Deserialization(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwarmwatchError {
    /// Check if the error is a transient transport failure worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            SwarmwatchError::ClusterUnreachable(_) | SwarmwatchError::Timeout(_) => true,
            SwarmwatchError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SwarmwatchError {
    fn from(e: serde_json::Error) -> Self {
        SwarmwatchError::Deserialization(e.to_string())
    }
}

/// Result type alias for swarmwatch operations.
pub type Result<T> = std::result::Result<T, SwarmwatchError>;
