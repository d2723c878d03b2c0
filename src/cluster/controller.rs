//! Failover controller.
//!
//! Drives one poll → evaluate → plan → execute cycle per tick. Migrations within a
//! cycle run concurrently up to a configured bound, share the cycle deadline, and
//! are drained when shutdown is requested: work in flight gets the grace period to
//! finish, work not yet started is abandoned and reported as cancelled.

use super::evaluator::evaluate;
use super::executor::{ApplyError, ApplyOutcome, MigrationExecutor};
use super::planner::{is_opted_out, plan, target_label_for};
use super::reader::SnapshotReader;
use crate::client::OrchestratorApi;
use crate::config::{ControllerConfig, LabelConfig, MigrationPolicy, SwarmwatchConfig};
use crate::error::Result;
use crate::events::{Event, EventBus, EventPayload, EventType};
use crate::observability;
use crate::shutdown::ShutdownCoordinator;
use crate::types::{
    ClusterSnapshot, FailoverDecision, FailoverReason, NodeId, PlacementChange, ServiceId,
};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What the controller is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerPhase {
    Monitoring,
    Migrating,
}

impl ControllerPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ControllerPhase::Migrating,
            _ => ControllerPhase::Monitoring,
        }
    }
}

/// Why a service did not reach its target placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FailureKind {
    NoEligibleTarget(String),
    RevisionConflict(String),
    ApplyFailed(String),
    DeadlineExceeded,
    Cancelled,
}

/// Per-service result of a failover cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationResult {
    /// Constraints were rewritten this cycle.
    Migrated,
    /// Already on the target; nothing written.
    Unchanged,
    /// Deleted between snapshot and apply.
    Vanished,
    /// Opted out of failover.
    Skipped,
    Failed(FailureKind),
}

impl MigrationResult {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            MigrationResult::Migrated | MigrationResult::Unchanged | MigrationResult::Vanished
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, MigrationResult::Failed(_))
    }

    fn metric_label(&self) -> &'static str {
        match self {
            MigrationResult::Migrated => "migrated",
            MigrationResult::Unchanged => "unchanged",
            MigrationResult::Vanished => "vanished",
            MigrationResult::Skipped => "skipped",
            MigrationResult::Failed(FailureKind::NoEligibleTarget(_)) => "no_eligible_target",
            MigrationResult::Failed(FailureKind::RevisionConflict(_)) => "revision_conflict",
            MigrationResult::Failed(FailureKind::ApplyFailed(_)) => "apply_failed",
            MigrationResult::Failed(FailureKind::DeadlineExceeded) => "deadline_exceeded",
            MigrationResult::Failed(FailureKind::Cancelled) => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOutcome {
    pub service_id: ServiceId,
    pub service_name: String,
    pub result: MigrationResult,
}

impl ServiceOutcome {
    fn new(service_id: &str, service_name: &str, result: MigrationResult) -> Self {
        Self {
            service_id: service_id.to_string(),
            service_name: service_name.to_string(),
            result,
        }
    }
}

/// Everything that happened in a cycle that attempted failover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub target_label: String,
    pub reason: FailoverReason,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// One entry per service in the snapshot.
    pub outcomes: Vec<ServiceOutcome>,
}

impl CycleSummary {
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_failure()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.result == MigrationResult::Skipped)
            .count()
    }

    pub fn migrated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.result == MigrationResult::Migrated)
            .count()
    }

    pub fn outcome(&self, service_id: &str) -> Option<&MigrationResult> {
        self.outcomes
            .iter()
            .find(|o| o.service_id == service_id)
            .map(|o| &o.result)
    }

    pub fn failed_services(&self) -> impl Iterator<Item = &ServiceOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_failure())
    }
}

/// Result of one controller cycle.
#[derive(Debug, Clone)]
pub enum CycleReport {
    /// The cluster could not be read; nothing was attempted.
    Unreachable { cycle: u64, error: String },
    /// The primary is healthy.
    Stable { cycle: u64, primary: NodeId },
    /// Failover was attempted.
    Failover(CycleSummary),
}

impl CycleReport {
    pub fn cycle(&self) -> u64 {
        match self {
            CycleReport::Unreachable { cycle, .. } | CycleReport::Stable { cycle, .. } => *cycle,
            CycleReport::Failover(summary) => summary.cycle,
        }
    }

    pub fn summary(&self) -> Option<&CycleSummary> {
        match self {
            CycleReport::Failover(summary) => Some(summary),
            _ => None,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, CycleReport::Unreachable { .. })
    }

    fn metric_label(&self) -> &'static str {
        match self {
            CycleReport::Unreachable { .. } => "unreachable",
            CycleReport::Stable { .. } => "stable",
            CycleReport::Failover(_) => "failover",
        }
    }
}

/// What a cycle would do to one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedAction {
    Apply(PlacementChange),
    AlreadyPlaced,
    OptedOut,
    NoEligibleTarget(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedService {
    pub service_id: ServiceId,
    pub service_name: String,
    pub action: PlannedAction,
}

/// A dry run: the decision for the current snapshot and the per-service plan.
#[derive(Debug, Clone)]
pub struct Preview {
    pub snapshot: ClusterSnapshot,
    pub decision: FailoverDecision,
    /// Empty when the primary is stable.
    pub services: Vec<PlannedService>,
}

/// Running totals since the controller started.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerStats {
    pub cycles: u64,
    pub stable_cycles: u64,
    pub failover_cycles: u64,
    pub unreachable_cycles: u64,
    pub configuration_errors: u64,
    pub services_migrated: u64,
    pub migration_failures: u64,
}

#[derive(Default)]
struct StatsInner {
    cycles: AtomicU64,
    stable_cycles: AtomicU64,
    failover_cycles: AtomicU64,
    unreachable_cycles: AtomicU64,
    configuration_errors: AtomicU64,
    services_migrated: AtomicU64,
    migration_failures: AtomicU64,
}

/// Resets the phase to monitoring however the migration step ends.
struct PhaseGuard<'a>(&'a AtomicU8);

impl<'a> PhaseGuard<'a> {
    fn enter(phase: &'a AtomicU8) -> Self {
        phase.store(ControllerPhase::Migrating as u8, Ordering::SeqCst);
        observability::record_phase(ControllerPhase::Migrating as u8);
        Self(phase)
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.store(ControllerPhase::Monitoring as u8, Ordering::SeqCst);
        observability::record_phase(ControllerPhase::Monitoring as u8);
    }
}

/// The failover control loop.
pub struct FailoverController {
    reader: SnapshotReader,
    executor: MigrationExecutor,
    labels: LabelConfig,
    config: ControllerConfig,
    events: Arc<EventBus>,
    phase: AtomicU8,
    cycle: AtomicU64,
    stats: StatsInner,
}

impl FailoverController {
    pub fn new(
        api: Arc<dyn OrchestratorApi>,
        config: &SwarmwatchConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            reader: SnapshotReader::new(api.clone(), config.api.call_timeout),
            executor: MigrationExecutor::new(
                api,
                config.retry.clone(),
                config.api.call_timeout,
            ),
            labels: config.labels.clone(),
            config: config.controller.clone(),
            events,
            phase: AtomicU8::new(ControllerPhase::Monitoring as u8),
            cycle: AtomicU64::new(0),
            stats: StatsInner::default(),
        }
    }

    pub fn phase(&self) -> ControllerPhase {
        ControllerPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn stats(&self) -> ControllerStats {
        let s = &self.stats;
        ControllerStats {
            cycles: s.cycles.load(Ordering::Relaxed),
            stable_cycles: s.stable_cycles.load(Ordering::Relaxed),
            failover_cycles: s.failover_cycles.load(Ordering::Relaxed),
            unreachable_cycles: s.unreachable_cycles.load(Ordering::Relaxed),
            configuration_errors: s.configuration_errors.load(Ordering::Relaxed),
            services_migrated: s.services_migrated.load(Ordering::Relaxed),
            migration_failures: s.migration_failures.load(Ordering::Relaxed),
        }
    }

    /// Run cycles every poll interval until shutdown.
    ///
    /// A cycle in progress when shutdown arrives is drained, not dropped: the loop
    /// only exits once that cycle has reported.
    pub async fn run(&self, shutdown: ShutdownCoordinator) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            cycle_deadline_ms = self.config.cycle_deadline.as_millis() as u64,
            max_concurrent = self.config.max_concurrent_migrations,
            "Failover controller starting"
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for_shutdown() => break,
                _ = ticker.tick() => {}
            }

            self.execute_cycle(&shutdown).await;

            if shutdown.is_shutting_down() {
                break;
            }
        }

        info!(cycles = self.stats.cycles.load(Ordering::Relaxed), "Failover controller stopped");
    }

    /// Run a single cycle with no shutdown signal attached.
    pub async fn run_cycle(&self) -> CycleReport {
        self.execute_cycle(&ShutdownCoordinator::new()).await
    }

    /// Run a single cycle, draining it if `shutdown` fires mid-way.
    pub async fn execute_cycle(&self, shutdown: &ShutdownCoordinator) -> CycleReport {
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        let started_at = Utc::now();
        let deadline = started + self.config.cycle_deadline;
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);

        debug!(cycle, "Cycle started");
        self.events
            .publish(Event::new(EventType::CycleStarted, cycle, EventPayload::Empty))
            .await;

        let report = match timeout_at(deadline, self.reader.capture()).await {
            Ok(Ok(snapshot)) => {
                self.handle_snapshot(cycle, snapshot, started, started_at, deadline, shutdown)
                    .await
            }
            Ok(Err(e)) => self.handle_unreachable(cycle, e.to_string()).await,
            Err(_) => {
                self.handle_unreachable(cycle, "snapshot exceeded the cycle deadline".to_string())
                    .await
            }
        };

        observability::record_cycle(report.metric_label(), started.elapsed());
        report
    }

    async fn handle_unreachable(&self, cycle: u64, error: String) -> CycleReport {
        self.stats.unreachable_cycles.fetch_add(1, Ordering::Relaxed);
        warn!(cycle, error = %error, "Cluster unreachable, skipping cycle");
        self.events
            .publish(Event::new(
                EventType::ClusterUnreachable,
                cycle,
                EventPayload::Unreachable {
                    error: error.clone(),
                },
            ))
            .await;
        CycleReport::Unreachable { cycle, error }
    }

    async fn handle_snapshot(
        &self,
        cycle: u64,
        snapshot: ClusterSnapshot,
        started: Instant,
        started_at: DateTime<Utc>,
        deadline: Instant,
        shutdown: &ShutdownCoordinator,
    ) -> CycleReport {
        let (target_label, reason) = match evaluate(&snapshot, &self.labels) {
            FailoverDecision::Stable { primary } => {
                self.stats.stable_cycles.fetch_add(1, Ordering::Relaxed);
                let hostname = snapshot
                    .node(&primary)
                    .map(|n| n.hostname.clone())
                    .unwrap_or_default();
                debug!(cycle, primary = %primary, "Primary healthy");
                self.events
                    .publish(Event::new(
                        EventType::PrimaryHealthy,
                        cycle,
                        EventPayload::Node {
                            node_id: primary.clone(),
                            hostname,
                        },
                    ))
                    .await;
                return CycleReport::Stable { cycle, primary };
            }
            FailoverDecision::FailoverRequired {
                target_label,
                reason,
            } => (target_label, reason),
        };

        self.stats.failover_cycles.fetch_add(1, Ordering::Relaxed);
        if reason.is_configuration_error() {
            self.stats
                .configuration_errors
                .fetch_add(1, Ordering::Relaxed);
            error!(cycle, reason = %reason, "Primary labeling is misconfigured");
            self.events
                .publish(Event::new(
                    EventType::ConfigurationError,
                    cycle,
                    EventPayload::Failover {
                        target_label: target_label.clone(),
                        reason: reason.to_string(),
                    },
                ))
                .await;
        } else {
            warn!(cycle, reason = %reason, target = %target_label, "Failover triggered");
        }
        self.events
            .publish(Event::new(
                EventType::FailoverTriggered,
                cycle,
                EventPayload::Failover {
                    target_label: target_label.clone(),
                    reason: reason.to_string(),
                },
            ))
            .await;

        let outcomes = {
            let _phase = PhaseGuard::enter(&self.phase);
            self.migrate(cycle, &snapshot, &target_label, deadline, shutdown)
                .await
        };

        let summary = CycleSummary {
            cycle,
            target_label,
            reason,
            started_at,
            duration: started.elapsed(),
            outcomes,
        };

        info!(
            cycle,
            succeeded = summary.successes(),
            migrated = summary.migrated(),
            failed = summary.failures(),
            skipped = summary.skipped(),
            duration_ms = summary.duration.as_millis() as u64,
            "Failover cycle completed"
        );
        self.events
            .publish(Event::new(
                EventType::CycleCompleted,
                cycle,
                EventPayload::Summary {
                    succeeded: summary.successes(),
                    failed: summary.failures(),
                    skipped: summary.skipped(),
                    duration_ms: summary.duration.as_millis() as u64,
                },
            ))
            .await;

        CycleReport::Failover(summary)
    }

    /// Capture and evaluate the cluster, and plan every service without applying.
    pub async fn preview(&self) -> Result<Preview> {
        let snapshot = self.reader.capture().await?;
        let decision = evaluate(&snapshot, &self.labels);
        let services = match decision.target_label() {
            Some(target) => self.plan_all(&snapshot, target),
            None => Vec::new(),
        };

        Ok(Preview {
            decision,
            services,
            snapshot,
        })
    }

    fn plan_all(&self, snapshot: &ClusterSnapshot, target_label: &str) -> Vec<PlannedService> {
        snapshot
            .services
            .iter()
            .map(|service| {
                let action = if is_opted_out(service, &self.labels) {
                    PlannedAction::OptedOut
                } else {
                    let target = target_label_for(service, target_label, &self.labels);
                    match plan(service, target, snapshot, &self.labels) {
                        Ok(change)
                            if self.config.migration_policy == MigrationPolicy::SkipSatisfied
                                && change.is_satisfied_by(&service.constraints) =>
                        {
                            PlannedAction::AlreadyPlaced
                        }
                        Ok(change) => PlannedAction::Apply(change),
                        Err(e) => PlannedAction::NoEligibleTarget(e.to_string()),
                    }
                };

                PlannedService {
                    service_id: service.id.clone(),
                    service_name: service.name.clone(),
                    action,
                }
            })
            .collect()
    }

    /// Plan every service, then apply the changes with bounded concurrency.
    async fn migrate(
        &self,
        cycle: u64,
        snapshot: &ClusterSnapshot,
        target_label: &str,
        mut deadline: Instant,
        shutdown: &ShutdownCoordinator,
    ) -> Vec<ServiceOutcome> {
        let mut outcomes = Vec::with_capacity(snapshot.services.len());
        let mut pending: VecDeque<PlacementChange> = VecDeque::new();

        for planned in self.plan_all(snapshot, target_label) {
            let result = match planned.action {
                PlannedAction::Apply(change) => {
                    pending.push_back(change);
                    continue;
                }
                PlannedAction::OptedOut => MigrationResult::Skipped,
                PlannedAction::AlreadyPlaced => MigrationResult::Unchanged,
                PlannedAction::NoEligibleTarget(detail) => {
                    MigrationResult::Failed(FailureKind::NoEligibleTarget(detail))
                }
            };
            outcomes.push(
                self.record(cycle, &planned.service_id, &planned.service_name, result)
                    .await,
            );
        }

        let limit = self.config.max_concurrent_migrations.max(1);
        let mut in_flight = FuturesUnordered::new();
        let mut running: HashMap<ServiceId, String> = HashMap::new();
        let mut draining = false;

        loop {
            while in_flight.len() < limit {
                // Nothing new starts once shutdown has been requested.
                if !draining && shutdown.is_shutting_down() {
                    draining = true;
                    deadline = deadline.min(Instant::now() + shutdown.grace());
                    warn!(
                        cycle,
                        in_flight = in_flight.len(),
                        abandoned = pending.len(),
                        "Shutdown requested, draining in-flight migrations"
                    );
                }
                if draining {
                    break;
                }
                let Some(change) = pending.pop_front() else {
                    break;
                };
                running.insert(change.service_id.clone(), change.service_name.clone());
                in_flight.push(async move {
                    let result = self.executor.apply(&change).await;
                    (change, result)
                });
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.wait_for_shutdown(), if !draining => {
                    draining = true;
                    let grace = Instant::now() + shutdown.grace();
                    deadline = deadline.min(grace);
                    warn!(
                        cycle,
                        in_flight = in_flight.len(),
                        abandoned = pending.len(),
                        "Shutdown requested, draining in-flight migrations"
                    );
                }
                _ = sleep_until(deadline) => break,
                Some((change, result)) = in_flight.next() => {
                    running.remove(&change.service_id);
                    let result = self.classify(cycle, &change, result);
                    outcomes.push(
                        self.record(cycle, &change.service_id, &change.service_name, result)
                            .await,
                    );
                }
            }
        }

        // Dropping the set aborts whatever is still running.
        drop(in_flight);

        // Unfinished work is cancelled if we were draining, else it ran out of cycle.
        let unfinished = if draining {
            FailureKind::Cancelled
        } else {
            FailureKind::DeadlineExceeded
        };

        let mut leftover: Vec<(ServiceId, String)> = running.into_iter().collect();
        leftover.sort();
        for (id, name) in leftover {
            warn!(cycle, service = %name, "Migration did not finish in time");
            outcomes.push(
                self.record(cycle, &id, &name, MigrationResult::Failed(unfinished.clone()))
                    .await,
            );
        }
        for change in pending {
            outcomes.push(
                self.record(
                    cycle,
                    &change.service_id,
                    &change.service_name,
                    MigrationResult::Failed(unfinished.clone()),
                )
                .await,
            );
        }

        outcomes
    }

    fn classify(
        &self,
        cycle: u64,
        change: &PlacementChange,
        result: std::result::Result<ApplyOutcome, ApplyError>,
    ) -> MigrationResult {
        match result {
            Ok(ApplyOutcome::Updated) => {
                info!(
                    cycle,
                    service = %change.service_name,
                    planned_revision = %change.expected_revision,
                    constraints = ?change.desired_constraints,
                    "Service migrated"
                );
                MigrationResult::Migrated
            }
            Ok(ApplyOutcome::AlreadyApplied) => MigrationResult::Unchanged,
            Err(ApplyError::ServiceVanished(_)) => {
                debug!(cycle, service = %change.service_name, "Service vanished before apply");
                MigrationResult::Vanished
            }
            Err(e @ ApplyError::RevisionConflict { .. }) => {
                warn!(cycle, service = %change.service_name, error = %e, "Service changed concurrently, will re-plan next cycle");
                MigrationResult::Failed(FailureKind::RevisionConflict(e.to_string()))
            }
            Err(e @ ApplyError::ApplyFailed { .. }) => {
                error!(cycle, service = %change.service_name, error = %e, "Service migration failed");
                MigrationResult::Failed(FailureKind::ApplyFailed(e.to_string()))
            }
        }
    }

    /// Publish, count and wrap one service's result.
    async fn record(
        &self,
        cycle: u64,
        service_id: &str,
        service_name: &str,
        result: MigrationResult,
    ) -> ServiceOutcome {
        observability::record_migration(result.metric_label());

        let (event_type, detail) = match &result {
            MigrationResult::Migrated => {
                self.stats.services_migrated.fetch_add(1, Ordering::Relaxed);
                (EventType::ServiceMigrated, None)
            }
            MigrationResult::Unchanged => (EventType::ServiceUnchanged, None),
            MigrationResult::Vanished => (
                EventType::ServiceUnchanged,
                Some("service no longer exists".to_string()),
            ),
            MigrationResult::Skipped => (
                EventType::ServiceUnchanged,
                Some("opted out of failover".to_string()),
            ),
            MigrationResult::Failed(kind) => {
                self.stats.migration_failures.fetch_add(1, Ordering::Relaxed);
                let detail = match kind {
                    FailureKind::NoEligibleTarget(d)
                    | FailureKind::RevisionConflict(d)
                    | FailureKind::ApplyFailed(d) => d.clone(),
                    FailureKind::DeadlineExceeded => "cycle deadline exceeded".to_string(),
                    FailureKind::Cancelled => "cancelled by shutdown".to_string(),
                };
                (EventType::ServiceMigrationFailed, Some(detail))
            }
        };

        self.events
            .publish(Event::service(
                event_type,
                cycle,
                service_id,
                service_name,
                detail,
            ))
            .await;

        ServiceOutcome::new(service_id, service_name, result)
    }
}
