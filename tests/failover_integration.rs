//! End-to-end failover scenarios against the in-memory orchestrator.

mod common;

use common::*;
use std::time::Duration;
use swarmwatch::client::OrchestratorApi;
use swarmwatch::cluster::{
    plan, ApplyError, CycleReport, FailureKind, MigrationExecutor, MigrationResult, SnapshotReader,
};
use swarmwatch::config::LabelConfig;
use swarmwatch::events::{EventFilter, EventType};
use swarmwatch::resilience::RetryConfig;
use swarmwatch::shutdown::ShutdownCoordinator;
use swarmwatch::{NodeState, Service};

#[tokio::test]
async fn test_primary_down_migrates_service() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-web", "web")
        .build()
        .await;
    let controller = controller(api.clone(), &test_config());

    let report = controller.run_cycle().await;
    let summary = expect_failover(&report);

    assert_eq!(summary.successes(), 1);
    assert_eq!(summary.failures(), 0);
    assert_eq!(summary.target_label, "secondary");
    assert_outcome(summary, "svc-web", &MigrationResult::Migrated);
    assert_constraints(&api, "svc-web", &[SECONDARY_CONSTRAINT]).await;
}

#[tokio::test]
async fn test_healthy_primary_leaves_cluster_untouched() {
    let api = ClusterBuilder::new()
        .pinned_service("svc-web", "web")
        .pinned_service("svc-api", "api")
        .build()
        .await;
    let controller = controller(api.clone(), &test_config());

    for _ in 0..3 {
        let report = controller.run_cycle().await;
        assert!(matches!(report, CycleReport::Stable { ref primary, .. } if primary == "nodeA"));
    }

    assert_eq!(api.update_count("svc-web").await, 0);
    assert_eq!(api.update_count("svc-api").await, 0);
    assert_constraints(&api, "svc-web", &[PRIMARY_CONSTRAINT]).await;
}

#[tokio::test]
async fn test_unrelated_constraints_survive_failover() {
    let mut generator = ServiceGenerator::new(7);
    let services: Vec<Service> = (0..12).map(|i| generator.service(i)).collect();

    let mut builder = ClusterBuilder::new().primary_down();
    for service in services.clone() {
        builder = builder.service(service);
    }
    let api = builder.build().await;
    let controller = controller(api.clone(), &test_config());

    let summary = expect_failover(&controller.run_cycle().await).clone();
    assert_eq!(summary.migrated(), services.len());

    for service in &services {
        let mut expected: Vec<&str> = service
            .constraints
            .iter()
            .map(String::as_str)
            .filter(|c| *c != PRIMARY_CONSTRAINT && !c.starts_with("node.labels.type"))
            .collect();
        expected.push(SECONDARY_CONSTRAINT);
        assert_constraints(&api, &service.id, &expected).await;
    }
}

#[tokio::test]
async fn test_partial_failure_is_isolated() {
    let labels = LabelConfig::default();
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-1", "one")
        .service(
            Service::new("svc-2", "two")
                .with_constraint(PRIMARY_CONSTRAINT)
                .with_label(&labels.target_override, "tertiary"),
        )
        .pinned_service("svc-3", "three")
        .build()
        .await;
    let controller = controller(api.clone(), &test_config());

    let summary = expect_failover(&controller.run_cycle().await).clone();

    assert_eq!(summary.failures(), 1);
    assert_outcome(&summary, "svc-1", &MigrationResult::Migrated);
    assert_outcome(&summary, "svc-3", &MigrationResult::Migrated);
    assert!(matches!(
        summary.outcome("svc-2"),
        Some(MigrationResult::Failed(FailureKind::NoEligibleTarget(_)))
    ));
    assert_constraints(&api, "svc-2", &[PRIMARY_CONSTRAINT]).await;
}

#[tokio::test]
async fn test_apply_failure_does_not_stop_other_services() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-1", "one")
        .pinned_service("svc-2", "two")
        .pinned_service("svc-3", "three")
        .build()
        .await;
    let mut config = test_config();
    config.controller.max_concurrent_migrations = 1;
    let controller = controller(api.clone(), &config);

    // With one migration at a time the first service absorbs the failure.
    api.fail_next_updates(1).await;
    let summary = expect_failover(&controller.run_cycle().await).clone();

    assert_eq!(summary.failures(), 1);
    assert!(matches!(
        summary.outcome("svc-1"),
        Some(MigrationResult::Failed(FailureKind::ApplyFailed(_)))
    ));
    assert_outcome(&summary, "svc-2", &MigrationResult::Migrated);
    assert_outcome(&summary, "svc-3", &MigrationResult::Migrated);

    // The next cycle picks up the straggler.
    let summary = expect_failover(&controller.run_cycle().await).clone();
    assert_outcome(&summary, "svc-1", &MigrationResult::Migrated);
    assert_eq!(summary.failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retried_within_cycle() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-web", "web")
        .build()
        .await;
    let mut config = test_config();
    config.retry = RetryConfig::quick();
    let controller = controller(api.clone(), &config);

    api.fail_next_updates(2).await;
    let summary = expect_failover(&controller.run_cycle().await).clone();

    assert_outcome(&summary, "svc-web", &MigrationResult::Migrated);
    assert_eq!(api.update_count("svc-web").await, 1);
}

#[tokio::test]
async fn test_repeated_cycles_are_idempotent() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-web", "web")
        .build()
        .await;
    let controller = controller(api.clone(), &test_config());

    controller.run_cycle().await;
    let after_first = api.raw_spec("svc-web").await.unwrap();

    for _ in 0..3 {
        let summary = expect_failover(&controller.run_cycle().await).clone();
        assert_outcome(&summary, "svc-web", &MigrationResult::Unchanged);
    }

    assert_eq!(api.update_count("svc-web").await, 1);
    assert_eq!(api.raw_spec("svc-web").await.unwrap(), after_first);
}

#[tokio::test]
async fn test_stale_revision_is_not_overwritten() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-web", "web")
        .build()
        .await;
    let labels = LabelConfig::default();
    let reader = SnapshotReader::new(api.clone(), Duration::from_secs(1));
    let executor = MigrationExecutor::new(api.clone(), RetryConfig::none(), Duration::from_secs(1));

    let snapshot = reader.capture().await.unwrap();
    let service = snapshot.service("svc-web").unwrap();
    let change = plan(service, "secondary", &snapshot, &labels).unwrap();

    // Someone else edits the service between snapshot and apply.
    api.external_update("svc-web", &["node.labels.zone == east".to_string()])
        .await;

    let first = executor.apply(&change).await.unwrap_err();
    let second = executor.apply(&change).await.unwrap_err();
    assert!(matches!(first, ApplyError::RevisionConflict { .. }));
    assert!(matches!(second, ApplyError::RevisionConflict { .. }));
    assert_eq!(api.update_count("svc-web").await, 0);
    assert_constraints(&api, "svc-web", &["node.labels.zone == east"]).await;

    // A later cycle re-plans from the fresh spec.
    let controller = controller(api.clone(), &test_config());
    let summary = expect_failover(&controller.run_cycle().await).clone();
    assert_outcome(&summary, "svc-web", &MigrationResult::Migrated);
    assert_constraints(
        &api,
        "svc-web",
        &["node.labels.zone == east", SECONDARY_CONSTRAINT],
    )
    .await;
}

#[tokio::test]
async fn test_vanished_service_counts_as_success() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-web", "web")
        .build()
        .await;
    let reader = SnapshotReader::new(api.clone(), Duration::from_secs(1));
    let executor = MigrationExecutor::new(api.clone(), RetryConfig::none(), Duration::from_secs(1));

    let snapshot = reader.capture().await.unwrap();
    let change = plan(
        snapshot.service("svc-web").unwrap(),
        "secondary",
        &snapshot,
        &LabelConfig::default(),
    )
    .unwrap();
    api.remove_service("svc-web").await;

    assert!(matches!(
        executor.apply(&change).await,
        Err(ApplyError::ServiceVanished(_))
    ));
}

#[tokio::test]
async fn test_unreachable_cluster_skips_cycle_then_recovers() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-web", "web")
        .build()
        .await;
    let controller = controller(api.clone(), &test_config());

    api.set_unreachable(true).await;
    let report = controller.run_cycle().await;
    assert!(report.is_unreachable());
    assert_eq!(api.update_count("svc-web").await, 0);

    api.set_unreachable(false).await;
    let summary = expect_failover(&controller.run_cycle().await).clone();
    assert_outcome(&summary, "svc-web", &MigrationResult::Migrated);

    let stats = controller.stats();
    assert_eq!(stats.cycles, 2);
    assert_eq!(stats.unreachable_cycles, 1);
    assert_eq!(stats.services_migrated, 1);
}

#[tokio::test]
async fn test_failover_follows_primary_recovery() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-web", "web")
        .build()
        .await;
    let controller = controller(api.clone(), &test_config());

    controller.run_cycle().await;
    api.set_node_state("nodeA", NodeState::Ready).await;

    // Services stay on the secondary once the primary returns.
    let report = controller.run_cycle().await;
    assert!(matches!(report, CycleReport::Stable { .. }));
    assert_constraints(&api, "svc-web", &[SECONDARY_CONSTRAINT]).await;
}

#[tokio::test]
async fn test_no_healthy_secondary_fails_every_service() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-1", "one")
        .pinned_service("svc-2", "two")
        .build()
        .await;
    api.set_node_state("nodeB", NodeState::Down).await;
    let controller = controller(api.clone(), &test_config());

    let summary = expect_failover(&controller.run_cycle().await).clone();
    assert_eq!(summary.failures(), 2);
    assert_eq!(api.update_count("svc-1").await, 0);
}

#[tokio::test]
async fn test_events_published_per_service() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-1", "one")
        .pinned_service("svc-2", "two")
        .build()
        .await;
    let controller = controller(api.clone(), &test_config());
    let mut migrated = controller
        .events()
        .subscribe(EventFilter::new().event_types([EventType::ServiceMigrated]))
        .await
        .unwrap();

    controller.run_cycle().await;

    let mut ids = Vec::new();
    while let Some(event) = migrated.try_recv() {
        ids.push(event.service_id().unwrap().to_string());
    }
    ids.sort();
    assert_eq!(ids, vec!["svc-1".to_string(), "svc-2".to_string()]);

    let history = controller.events().history(100).await;
    assert_eq!(history.first().unwrap().event_type, EventType::CycleStarted);
    assert_eq!(history.last().unwrap().event_type, EventType::CycleCompleted);
    assert!(history
        .iter()
        .any(|e| e.event_type == EventType::FailoverTriggered));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_exceeded_services_reported() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-1", "one")
        .pinned_service("svc-2", "two")
        .build()
        .await;
    api.set_update_delay(Some(Duration::from_secs(30))).await;
    let mut config = test_config();
    config.controller.cycle_deadline = Duration::from_secs(3);
    config.controller.max_concurrent_migrations = 1;
    let controller = controller(api.clone(), &config);

    let summary = expect_failover(&controller.run_cycle().await).clone();
    assert_eq!(summary.failures(), 2);
    for id in ["svc-1", "svc-2"] {
        assert_outcome(
            &summary,
            id,
            &MigrationResult::Failed(FailureKind::DeadlineExceeded),
        );
    }
    assert!(summary.duration < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_in_flight_and_cancels_the_rest() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-1", "one")
        .pinned_service("svc-2", "two")
        .pinned_service("svc-3", "three")
        .build()
        .await;
    api.set_update_delay(Some(Duration::from_secs(1))).await;
    let mut config = test_config();
    config.controller.max_concurrent_migrations = 1;
    let controller = controller(api.clone(), &config);

    let shutdown = ShutdownCoordinator::with_grace(Duration::from_secs(5));
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.shutdown();
    });

    let report = controller.execute_cycle(&shutdown).await;
    let summary = expect_failover(&report);

    // The in-flight migration finished within the grace period.
    assert_outcome(summary, "svc-1", &MigrationResult::Migrated);
    assert_outcome(
        summary,
        "svc-2",
        &MigrationResult::Failed(FailureKind::Cancelled),
    );
    assert_outcome(
        summary,
        "svc-3",
        &MigrationResult::Failed(FailureKind::Cancelled),
    );
    assert_constraints(&api, "svc-2", &[PRIMARY_CONSTRAINT]).await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_grace_bounds_in_flight_work() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-1", "one")
        .build()
        .await;
    api.set_update_delay(Some(Duration::from_secs(60))).await;
    let controller = controller(api.clone(), &test_config());

    let shutdown = ShutdownCoordinator::with_grace(Duration::from_secs(1));
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.shutdown();
    });

    let report = controller.execute_cycle(&shutdown).await;
    let summary = expect_failover(&report);
    assert_outcome(
        summary,
        "svc-1",
        &MigrationResult::Failed(FailureKind::Cancelled),
    );
    assert!(summary.duration < Duration::from_secs(2));
    assert_eq!(api.update_count("svc-1").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_before_cycle_starts_no_writes() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-1", "one")
        .pinned_service("svc-2", "two")
        .build()
        .await;
    api.set_update_delay(Some(Duration::from_millis(10))).await;
    let controller = controller(api.clone(), &test_config());

    let shutdown = ShutdownCoordinator::with_grace(Duration::from_secs(5));
    shutdown.shutdown();

    let report = controller.execute_cycle(&shutdown).await;
    let summary = expect_failover(&report);
    for id in ["svc-1", "svc-2"] {
        assert_outcome(
            summary,
            id,
            &MigrationResult::Failed(FailureKind::Cancelled),
        );
        assert_eq!(api.update_count(id).await, 0);
    }
    assert_constraints(&api, "svc-1", &[PRIMARY_CONSTRAINT]).await;
}

#[tokio::test]
async fn test_check_preview_matches_cycle() {
    let api = ClusterBuilder::new()
        .primary_down()
        .pinned_service("svc-web", "web")
        .build()
        .await;
    let controller = controller(api.clone(), &test_config());

    let preview = controller.preview().await.unwrap();
    assert_eq!(api.update_count("svc-web").await, 0);
    assert_eq!(preview.decision.target_label(), Some("secondary"));

    // Reading through the trait object works the same as the concrete type.
    let api_dyn: &dyn OrchestratorApi = api.as_ref();
    assert_eq!(api_dyn.list_services().await.unwrap().len(), 1);
}
