// Cluster fixtures for integration tests

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use swarmwatch::client::InMemoryOrchestrator;
use swarmwatch::cluster::FailoverController;
use swarmwatch::config::SwarmwatchConfig;
use swarmwatch::events::{EventBus, EventBusConfig};
use swarmwatch::{Node, NodeState, Service};

pub const PRIMARY_CONSTRAINT: &str = "node.labels.type == primary";
pub const SECONDARY_CONSTRAINT: &str = "node.labels.type == secondary";

/// Builder for an in-memory swarm with a primary/secondary pair.
pub struct ClusterBuilder {
    primary_state: NodeState,
    services: Vec<Service>,
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self {
            primary_state: NodeState::Ready,
            services: Vec::new(),
        }
    }

    pub fn primary_down(mut self) -> Self {
        self.primary_state = NodeState::Down;
        self
    }

    /// Add a service pinned to the primary.
    pub fn pinned_service(mut self, id: &str, name: &str) -> Self {
        self.services
            .push(Service::new(id, name).with_constraint(PRIMARY_CONSTRAINT));
        self
    }

    pub fn service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    pub async fn build(self) -> Arc<InMemoryOrchestrator> {
        let nodes = vec![
            Node::new("nodeA", "swarm-a")
                .with_label("type", "primary")
                .with_state(self.primary_state),
            Node::new("nodeB", "swarm-b").with_label("type", "secondary"),
        ];

        Arc::new(InMemoryOrchestrator::with_cluster(nodes, self.services).await)
    }
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic generator for services with assorted extra constraints.
pub struct ServiceGenerator {
    rng: StdRng,
}

impl ServiceGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A service pinned to the primary plus zero to two unrelated constraints.
    pub fn service(&mut self, index: usize) -> Service {
        const EXTRA: [&str; 4] = [
            "disk==ssd",
            "node.role == worker",
            "node.labels.zone != west",
            "engine.labels.type == primary",
        ];

        let mut service = Service::new(format!("svc-{}", index), format!("app-{}", index));
        for _ in 0..self.rng.gen_range(0..=2) {
            let extra = EXTRA[self.rng.gen_range(0..EXTRA.len())];
            service = service.with_constraint(extra);
        }
        service.with_constraint(PRIMARY_CONSTRAINT)
    }
}

pub fn controller(
    api: Arc<InMemoryOrchestrator>,
    config: &SwarmwatchConfig,
) -> FailoverController {
    FailoverController::new(api, config, EventBus::new(EventBusConfig::default()))
}
