//! In-memory orchestrator.
//!
//! Keeps nodes and service specs in process, enforces revision tokens the same way
//! the swarm does, and exposes knobs to inject the failures the controller has to
//! survive: an unreachable API, transient update errors, slow calls and concurrent
//! writers.

use super::{OrchestratorApi, ServiceSpec};
use crate::error::{Result, SwarmwatchError};
use crate::types::{Node, NodeState, Revision, Service};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    nodes: Vec<Node>,
    services: Vec<ServiceSpec>,
    unreachable: bool,
    transient_update_failures: u32,
    update_delay: Option<Duration>,
    update_counts: HashMap<String, u64>,
}

/// Orchestrator that lives entirely in memory.
#[derive(Default)]
pub struct InMemoryOrchestrator {
    state: RwLock<MemoryState>,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from nodes and service summaries.
    pub async fn with_cluster(nodes: Vec<Node>, services: Vec<Service>) -> Self {
        let orchestrator = Self::new();
        for node in nodes {
            orchestrator.add_node(node).await;
        }
        for service in services {
            orchestrator.add_service(service).await;
        }
        orchestrator
    }

    pub async fn add_node(&self, node: Node) {
        let mut state = self.state.write().await;
        state.nodes.retain(|n| n.id != node.id);
        state.nodes.push(node);
    }

    /// Register a service, synthesising a minimal swarm spec around it.
    pub async fn add_service(&self, service: Service) {
        let spec = json!({
            "Name": service.name,
            "Labels": service.labels,
            "TaskTemplate": {
                "ContainerSpec": { "Image": format!("{}:latest", service.name) },
                "Placement": { "Constraints": service.constraints }
            },
            "Mode": { "Replicated": { "Replicas": 1 } }
        });

        let mut state = self.state.write().await;
        state.services.retain(|s| s.id != service.id);
        state
            .services
            .push(ServiceSpec::new(service.id, service.revision, spec));
    }

    pub async fn remove_service(&self, id: &str) {
        self.state.write().await.services.retain(|s| s.id != id);
    }

    pub async fn set_node_state(&self, id: &str, node_state: NodeState) {
        let mut state = self.state.write().await;
        if let Some(node) = state.nodes.iter_mut().find(|n| n.id == id) {
            node.state = node_state;
        }
    }

    /// Make every call fail as if the API were down.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.write().await.unreachable = unreachable;
    }

    /// Fail the next `count` updates with a retryable 503.
    pub async fn fail_next_updates(&self, count: u32) {
        self.state.write().await.transient_update_failures = count;
    }

    /// Delay every update by `delay`.
    pub async fn set_update_delay(&self, delay: Option<Duration>) {
        self.state.write().await.update_delay = delay;
    }

    /// Simulate another actor rewriting a service's constraints.
    pub async fn external_update(&self, id: &str, constraints: &[String]) {
        let mut state = self.state.write().await;
        if let Some(spec) = state.services.iter_mut().find(|s| s.id == id) {
            spec.set_constraints(constraints);
            spec.revision = spec.revision.next();
        }
    }

    /// Current summary of a service.
    pub async fn service(&self, id: &str) -> Option<Service> {
        let state = self.state.read().await;
        state
            .services
            .iter()
            .find(|s| s.id == id)
            .map(ServiceSpec::to_service)
    }

    /// Current raw spec of a service.
    pub async fn raw_spec(&self, id: &str) -> Option<Value> {
        let state = self.state.read().await;
        state
            .services
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.spec.clone())
    }

    /// Number of accepted updates for a service.
    pub async fn update_count(&self, id: &str) -> u64 {
        let state = self.state.read().await;
        state.update_counts.get(id).copied().unwrap_or(0)
    }

    fn check_reachable(state: &MemoryState) -> Result<()> {
        if state.unreachable {
            return Err(SwarmwatchError::ClusterUnreachable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl OrchestratorApi for InMemoryOrchestrator {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let state = self.state.read().await;
        Self::check_reachable(&state)?;
        Ok(state.nodes.clone())
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let state = self.state.read().await;
        Self::check_reachable(&state)?;
        Ok(state.services.iter().map(ServiceSpec::to_service).collect())
    }

    async fn inspect_service(&self, id: &str) -> Result<ServiceSpec> {
        let state = self.state.read().await;
        Self::check_reachable(&state)?;
        state
            .services
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| SwarmwatchError::NotFound(format!("service {}", id)))
    }

    async fn update_service(&self, id: &str, revision: Revision, spec: &Value) -> Result<()> {
        let delay = self.state.read().await.update_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        Self::check_reachable(&state)?;

        if state.transient_update_failures > 0 {
            state.transient_update_failures -= 1;
            return Err(SwarmwatchError::Api {
                status: 503,
                message: "swarm manager is busy".to_string(),
            });
        }

        let stored = state
            .services
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| SwarmwatchError::NotFound(format!("service {}", id)))?;

        if stored.revision != revision {
            return Err(SwarmwatchError::Conflict(format!(
                "update out of sequence: have {}, got {}",
                stored.revision, revision
            )));
        }

        stored.spec = spec.clone();
        stored.revision = stored.revision.next();
        *state.update_counts.entry(id.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_bumps_revision() {
        let api = InMemoryOrchestrator::with_cluster(
            vec![Node::new("a", "host-a")],
            vec![Service::new("s1", "web").with_revision(Revision(7))],
        )
        .await;

        let mut spec = api.inspect_service("s1").await.unwrap();
        spec.set_constraints(&["node.labels.type == secondary".to_string()]);
        api.update_service("s1", Revision(7), &spec.spec).await.unwrap();

        let service = api.service("s1").await.unwrap();
        assert_eq!(service.revision, Revision(8));
        assert_eq!(service.constraints, vec!["node.labels.type == secondary".to_string()]);
        assert_eq!(api.update_count("s1").await, 1);
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let api = InMemoryOrchestrator::with_cluster(vec![], vec![Service::new("s1", "web")]).await;
        let spec = api.inspect_service("s1").await.unwrap();

        let err = api
            .update_service("s1", Revision(99), &spec.spec)
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmwatchError::Conflict(_)));
        assert_eq!(api.update_count("s1").await, 0);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let api = InMemoryOrchestrator::with_cluster(vec![], vec![Service::new("s1", "web")]).await;

        api.set_unreachable(true).await;
        assert!(api.list_nodes().await.unwrap_err().is_retryable());
        api.set_unreachable(false).await;

        api.fail_next_updates(1).await;
        let spec = api.inspect_service("s1").await.unwrap();
        let err = api
            .update_service("s1", spec.revision, &spec.spec)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(api.update_service("s1", spec.revision, &spec.spec).await.is_ok());

        api.remove_service("s1").await;
        assert!(matches!(
            api.inspect_service("s1").await,
            Err(SwarmwatchError::NotFound(_))
        ));
    }
}
