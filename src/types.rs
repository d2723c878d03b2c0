//! Core type definitions for swarmwatch.
//!
//! Everything in here is a read-only view of external truth (nodes, services) or a
//! value derived from it (decisions, planned changes). Nothing here talks to the cluster.
//!
//! # Key Types
//!
//! - [`Node`]: a swarm node with its role, availability, observed state and labels
//! - [`Service`]: a swarm service with its placement constraints and revision
//! - [`ClusterSnapshot`]: nodes and services captured together for one cycle
//! - [`FailoverDecision`]: the evaluator's verdict for a snapshot
//! - [`PlacementChange`]: an intended, not yet applied, constraint rewrite
//!
//! # Examples
//!
//! ```rust
//! use swarmwatch::types::{Node, NodeState, Availability};
//!
//! let node = Node::new("n1", "host-a")
//!     .with_label("type", "primary")
//!     .with_state(NodeState::Ready);
//! assert!(node.is_healthy());
//! assert_eq!(node.label("type"), Some("primary"));
//!
//! let drained = node.clone().with_availability(Availability::Drain);
//! assert!(!drained.is_healthy());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque swarm node identifier.
pub type NodeId = String;

/// Opaque swarm service identifier.
pub type ServiceId = String;

/// Revision token of a service spec.
///
/// Swarm calls this the object version index. Updates must carry the revision they were
/// computed against or the API rejects them as out of sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Revision(pub u64);

impl Revision {
    pub fn next(self) -> Self {
        Revision(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node role in the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Manager,
    Worker,
}

/// Scheduling availability set by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Active,
    Pause,
    Drain,
}

/// Node state as observed by the swarm managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Ready,
    Down,
    Disconnected,
    Unknown,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Ready => "ready",
            NodeState::Down => "down",
            NodeState::Disconnected => "disconnected",
            NodeState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Availability::Active => "active",
            Availability::Pause => "pause",
            Availability::Drain => "drain",
        };
        f.write_str(s)
    }
}

/// A swarm node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub hostname: String,
    pub role: NodeRole,
    pub availability: Availability,
    pub state: NodeState,
    pub labels: HashMap<String, String>,
}

impl Node {
    /// Create a ready, active worker with no labels.
    pub fn new(id: impl Into<NodeId>, hostname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            role: NodeRole::Worker,
            availability: Availability::Active,
            state: NodeState::Ready,
            labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_state(mut self, state: NodeState) -> Self {
        self.state = state;
        self
    }

    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// A node can host failover workloads only when it is both ready and active.
    pub fn is_healthy(&self) -> bool {
        self.state == NodeState::Ready && self.availability == Availability::Active
    }
}

/// A swarm service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    /// Placement constraints in spec order.
    pub constraints: Vec<String>,
    /// Service-level labels.
    pub labels: HashMap<String, String>,
    pub revision: Revision,
}

impl Service {
    pub fn new(id: impl Into<ServiceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            constraints: Vec::new(),
            labels: HashMap::new(),
            revision: Revision(1),
        }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = revision;
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Nodes and services captured for a single cycle.
///
/// The two listings are separate API calls. The orchestrator offers no multi-resource
/// read transaction, so a snapshot is only "read close together": a service may have
/// been updated between the node listing and the service listing. Revision tokens on
/// each service make any such drift surface as a conflict at apply time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub nodes: Vec<Node>,
    pub services: Vec<Service>,
    pub captured_at: DateTime<Utc>,
}

impl ClusterSnapshot {
    pub fn new(nodes: Vec<Node>, services: Vec<Service>) -> Self {
        Self {
            nodes,
            services,
            captured_at: Utc::now(),
        }
    }

    /// Nodes whose label `key` equals `value`.
    pub fn nodes_labeled<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.iter().filter(move |n| n.label(key) == Some(value))
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }
}

/// Why no single healthy primary could be confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    /// Exactly one primary exists but it is not ready or not active.
    PrimaryUnhealthy {
        node: NodeId,
        hostname: String,
        state: NodeState,
        availability: Availability,
    },
    /// No node carries the primary label.
    MissingPrimary,
    /// More than one node carries the primary label.
    AmbiguousPrimary { nodes: Vec<NodeId> },
}

impl FailoverReason {
    /// Missing or ambiguous primaries are operator configuration errors.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            FailoverReason::MissingPrimary | FailoverReason::AmbiguousPrimary { .. }
        )
    }
}

impl fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverReason::PrimaryUnhealthy {
                hostname,
                state,
                availability,
                ..
            } => write!(
                f,
                "primary {} is {} / {}",
                hostname, state, availability
            ),
            FailoverReason::MissingPrimary => write!(f, "configuration error: no primary node"),
            FailoverReason::AmbiguousPrimary { nodes } => write!(
                f,
                "configuration error: {} nodes labeled primary ({})",
                nodes.len(),
                nodes.join(", ")
            ),
        }
    }
}

/// Verdict of evaluating one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverDecision {
    /// The primary is ready and active.
    Stable { primary: NodeId },
    /// Services must move to nodes labeled `target_label`.
    FailoverRequired {
        target_label: String,
        reason: FailoverReason,
    },
}

impl FailoverDecision {
    pub fn is_stable(&self) -> bool {
        matches!(self, FailoverDecision::Stable { .. })
    }

    pub fn target_label(&self) -> Option<&str> {
        match self {
            FailoverDecision::Stable { .. } => None,
            FailoverDecision::FailoverRequired { target_label, .. } => Some(target_label),
        }
    }

    pub fn is_configuration_error(&self) -> bool {
        match self {
            FailoverDecision::Stable { .. } => false,
            FailoverDecision::FailoverRequired { reason, .. } => reason.is_configuration_error(),
        }
    }
}

/// An intended rewrite of one service's placement constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementChange {
    pub service_id: ServiceId,
    pub service_name: String,
    /// Complete replacement constraint list.
    pub desired_constraints: Vec<String>,
    /// Revision the change was planned against.
    pub expected_revision: Revision,
}

impl PlacementChange {
    /// True when `current` already matches the desired constraints.
    pub fn is_satisfied_by(&self, current: &[String]) -> bool {
        self.desired_constraints.as_slice() == current
    }
}
