//! Clients for the orchestration API.
//!
//! [`OrchestratorApi`] is the seam between the failover engine and the cluster. The
//! production implementation is [`DockerClient`]; [`InMemoryOrchestrator`] is a
//! deterministic stand-in used by tests.

mod docker;
pub mod memory;

pub use docker::DockerClient;
pub use memory::InMemoryOrchestrator;

use crate::error::{Result, SwarmwatchError};
use crate::types::{Node, Revision, Service, ServiceId};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Operations the controller needs from the orchestration API.
#[async_trait]
pub trait OrchestratorApi: Send + Sync {
    /// List every node in the swarm.
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// List every service in the swarm.
    async fn list_services(&self) -> Result<Vec<Service>>;

    /// Fetch the full spec of one service.
    ///
    /// Fails with [`SwarmwatchError::NotFound`] if the service does not exist.
    async fn inspect_service(&self, id: &str) -> Result<ServiceSpec>;

    /// Replace the spec of one service.
    ///
    /// Fails with [`SwarmwatchError::Conflict`] if `revision` is not the current one and
    /// with [`SwarmwatchError::NotFound`] if the service is gone.
    async fn update_service(&self, id: &str, revision: Revision, spec: &Value) -> Result<()>;
}

/// Full service spec as returned by inspect.
///
/// The spec is kept as raw JSON so that an update resubmits every field exactly as the
/// cluster returned it; only the placement constraints are ever rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub id: ServiceId,
    pub revision: Revision,
    pub spec: Value,
}

#[derive(Deserialize)]
struct RawService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Version")]
    version: RawVersion,
    #[serde(rename = "Spec", default)]
    spec: Value,
}

#[derive(Deserialize)]
struct RawVersion {
    #[serde(rename = "Index")]
    index: u64,
}

impl ServiceSpec {
    pub fn new(id: impl Into<ServiceId>, revision: Revision, spec: Value) -> Self {
        Self {
            id: id.into(),
            revision,
            spec,
        }
    }

    /// Parse a Docker service object (`{"ID", "Version": {"Index"}, "Spec"}`).
    pub fn from_docker(value: Value) -> Result<Self> {
        let raw: RawService = serde_json::from_value(value)?;
        Ok(Self {
            id: raw.id,
            revision: Revision(raw.version.index),
            spec: raw.spec,
        })
    }

    pub fn name(&self) -> &str {
        self.spec.get("Name").and_then(Value::as_str).unwrap_or("")
    }

    /// Placement constraints in spec order.
    pub fn constraints(&self) -> Vec<String> {
        self.spec
            .pointer("/TaskTemplate/Placement/Constraints")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn labels(&self) -> HashMap<String, String> {
        self.spec
            .get("Labels")
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace the placement constraints and nothing else.
    ///
    /// Sibling fields such as placement preferences, platforms or the container spec are
    /// left untouched; missing intermediate objects are created.
    pub fn set_constraints(&mut self, constraints: &[String]) {
        let root = ensure_object(&mut self.spec);
        let task_template = ensure_object(
            root.entry("TaskTemplate")
                .or_insert_with(|| Value::Object(Map::new())),
        );
        let placement = ensure_object(
            task_template
                .entry("Placement")
                .or_insert_with(|| Value::Object(Map::new())),
        );
        placement.insert(
            "Constraints".to_string(),
            Value::Array(constraints.iter().cloned().map(Value::String).collect()),
        );
    }

    /// Summary view used in snapshots.
    pub fn to_service(&self) -> Service {
        Service {
            id: self.id.clone(),
            name: self.name().to_string(),
            constraints: self.constraints(),
            labels: self.labels(),
            revision: self.revision,
        }
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// Build the error for a non-success API response.
pub(crate) fn api_error(status: u16, message: String) -> SwarmwatchError {
    match status {
        404 => SwarmwatchError::NotFound(message),
        409 => SwarmwatchError::Conflict(message),
        // Swarm reports stale versions as a 500 with this message.
        _ if message.contains("update out of sequence") => SwarmwatchError::Conflict(message),
        _ => SwarmwatchError::Api { status, message },
    }
}
