// Custom assertions for failover tests

use swarmwatch::client::InMemoryOrchestrator;
use swarmwatch::cluster::{CycleReport, CycleSummary, MigrationResult};

/// Assert the report is a failover cycle and return its summary.
pub fn expect_failover(report: &CycleReport) -> &CycleSummary {
    match report.summary() {
        Some(summary) => summary,
        None => panic!("expected a failover cycle, got {:?}", report),
    }
}

/// Assert a service's result within a summary.
pub fn assert_outcome(summary: &CycleSummary, service_id: &str, expected: &MigrationResult) {
    let actual = summary
        .outcome(service_id)
        .unwrap_or_else(|| panic!("no outcome recorded for {}", service_id));
    assert_eq!(
        actual, expected,
        "unexpected outcome for {}: {:?}",
        service_id, summary.outcomes
    );
}

/// Assert a service's live constraints.
pub async fn assert_constraints(api: &InMemoryOrchestrator, service_id: &str, expected: &[&str]) {
    let service = api
        .service(service_id)
        .await
        .unwrap_or_else(|| panic!("service {} missing", service_id));
    let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    assert_eq!(service.constraints, expected, "constraints of {}", service_id);
}
