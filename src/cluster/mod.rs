//! Failover engine.
//!
//! This module holds the poll → evaluate → plan → execute pipeline:
//! - Snapshot reader capturing nodes and services for one cycle
//! - Health evaluator deciding whether the primary is usable (pure)
//! - Placement planner rewriting one service's constraints (pure)
//! - Migration executor applying a planned change with retry and idempotence
//! - Failover controller driving cycles, deadlines and cancellation

mod controller;
mod evaluator;
mod executor;
mod planner;
mod reader;

pub use controller::{
    ControllerPhase, ControllerStats, CycleReport, CycleSummary, FailoverController,
    FailureKind, MigrationResult, PlannedAction, PlannedService, Preview, ServiceOutcome,
};
pub use evaluator::evaluate;
pub use executor::{ApplyError, ApplyOutcome, MigrationExecutor};
pub use planner::{is_opted_out, plan, placement_constraint, target_label_for, PlanError};
pub use reader::SnapshotReader;
