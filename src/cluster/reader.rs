//! Cluster snapshot reader.

use crate::client::OrchestratorApi;
use crate::error::{Result, SwarmwatchError};
use crate::resilience::with_timeout;
use crate::types::ClusterSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Captures the nodes and services a cycle works from.
///
/// The node and service listings are issued concurrently and stamped with a single
/// capture time. They are still two reads: see [`ClusterSnapshot`] for what that means
/// for consistency.
#[derive(Clone)]
pub struct SnapshotReader {
    api: Arc<dyn OrchestratorApi>,
    call_timeout: Duration,
}

impl SnapshotReader {
    pub fn new(api: Arc<dyn OrchestratorApi>, call_timeout: Duration) -> Self {
        Self { api, call_timeout }
    }

    /// Read the cluster. Any failure is reported as [`SwarmwatchError::ClusterUnreachable`].
    pub async fn capture(&self) -> Result<ClusterSnapshot> {
        let (nodes, services) = tokio::try_join!(
            with_timeout(self.call_timeout, || self.api.list_nodes()),
            with_timeout(self.call_timeout, || self.api.list_services()),
        )
        .map_err(|e| match e {
            SwarmwatchError::ClusterUnreachable(_) => e,
            other => SwarmwatchError::ClusterUnreachable(other.to_string()),
        })?;

        debug!(
            nodes = nodes.len(),
            services = services.len(),
            "Captured cluster snapshot"
        );
        Ok(ClusterSnapshot::new(nodes, services))
    }
}
