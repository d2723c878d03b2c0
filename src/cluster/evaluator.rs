//! Primary health evaluation.

use crate::config::{LabelConfig, NodeClass};
use crate::types::{ClusterSnapshot, FailoverDecision, FailoverReason, Node};

/// Decide whether the snapshot's primary can keep hosting services.
///
/// Exactly one node must carry the primary role label, and it must be both ready and
/// active. A missing or duplicated primary is a configuration error and still yields
/// `FailoverRequired`: silently picking one of several primaries is never safe.
pub fn evaluate(snapshot: &ClusterSnapshot, labels: &LabelConfig) -> FailoverDecision {
    let primaries: Vec<&Node> = snapshot
        .nodes
        .iter()
        .filter(|n| labels.classify(n) == Some(NodeClass::Primary))
        .collect();

    let reason = match primaries.as_slice() {
        [] => FailoverReason::MissingPrimary,
        [primary] if primary.is_healthy() => {
            return FailoverDecision::Stable {
                primary: primary.id.clone(),
            };
        }
        [primary] => FailoverReason::PrimaryUnhealthy {
            node: primary.id.clone(),
            hostname: primary.hostname.clone(),
            state: primary.state,
            availability: primary.availability,
        },
        many => FailoverReason::AmbiguousPrimary {
            nodes: many.iter().map(|n| n.id.clone()).collect(),
        },
    };

    FailoverDecision::FailoverRequired {
        target_label: labels.secondary.clone(),
        reason,
    }
}
