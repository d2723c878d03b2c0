//! Placement planning.
//!
//! Rewrites a service's constraint list so it schedules onto nodes carrying the
//! target role label. Only constraints on the role key are touched; every other
//! constraint the operator wrote survives in its original order.

use crate::config::LabelConfig;
use crate::types::{ClusterSnapshot, PlacementChange, Service};
use thiserror::Error;

/// Why a service could not be planned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("no eligible target for label {label}: {detail}")]
    NoEligibleTarget { label: String, detail: String },
}

/// The constraint pinning a service to nodes labeled `key == value`.
pub fn placement_constraint(key: &str, value: &str) -> String {
    format!("node.labels.{} == {}", key, value)
}

/// True when the service carries the opt-out label set to `false`.
pub fn is_opted_out(service: &Service, labels: &LabelConfig) -> bool {
    service
        .label(&labels.opt_out)
        .map(|v| v.trim().eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

/// Target label for one service: its override label when set, else the cycle's target.
pub fn target_label_for<'a>(
    service: &'a Service,
    default_target: &'a str,
    labels: &LabelConfig,
) -> &'a str {
    match service.label(&labels.target_override) {
        Some(v) if !v.trim().is_empty() => v.trim(),
        _ => default_target,
    }
}

/// Plan the constraint rewrite that moves `service` onto `target_label` nodes.
///
/// Fails with [`PlanError::NoEligibleTarget`] when no node in the snapshot carries the
/// target label, or when every such node is down or unschedulable.
pub fn plan(
    service: &Service,
    target_label: &str,
    snapshot: &ClusterSnapshot,
    labels: &LabelConfig,
) -> Result<PlacementChange, PlanError> {
    let candidates: Vec<_> = snapshot
        .nodes_labeled(&labels.role_key, target_label)
        .collect();

    if candidates.is_empty() {
        return Err(PlanError::NoEligibleTarget {
            label: target_label.to_string(),
            detail: format!("no node has {}={}", labels.role_key, target_label),
        });
    }
    if !candidates.iter().any(|n| n.is_healthy()) {
        return Err(PlanError::NoEligibleTarget {
            label: target_label.to_string(),
            detail: format!(
                "all {} node(s) with {}={} are unavailable",
                candidates.len(),
                labels.role_key,
                target_label
            ),
        });
    }

    let mut desired_constraints: Vec<String> = service
        .constraints
        .iter()
        .filter(|c| !constrains_label(c, &labels.role_key))
        .cloned()
        .collect();
    desired_constraints.push(placement_constraint(&labels.role_key, target_label));

    Ok(PlacementChange {
        service_id: service.id.clone(),
        service_name: service.name.clone(),
        desired_constraints,
        expected_revision: service.revision,
    })
}

/// True when `constraint` has `node.labels.<key>` on its left-hand side.
fn constrains_label(constraint: &str, key: &str) -> bool {
    let op = [constraint.find("=="), constraint.find("!=")]
        .into_iter()
        .flatten()
        .min();
    let lhs = match op {
        Some(idx) => &constraint[..idx],
        None => return false,
    };

    lhs.trim()
        .strip_prefix("node.labels.")
        .map(|k| k == key)
        .unwrap_or(false)
}
