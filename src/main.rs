//! swarmwatch CLI - main entry point.

use std::sync::Arc;
use swarmwatch::cli::{Cli, Commands};
use swarmwatch::client::{DockerClient, OrchestratorApi};
use swarmwatch::cluster::{FailoverController, PlannedAction, Preview};
use swarmwatch::config::{NodeClass, SwarmwatchConfig};
use swarmwatch::events::{EventBus, EventBusConfig};
use swarmwatch::FailoverDecision;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    let config = cli.load_config()?;
    swarmwatch::observability::init(&config.observability)?;

    match cli.command {
        Commands::Run => swarmwatch::run(config).await?,
        Commands::Check => check(config).await?,
        Commands::Status => status(config).await?,
    }

    Ok(())
}

async fn check(config: SwarmwatchConfig) -> anyhow::Result<()> {
    let api: Arc<dyn OrchestratorApi> = Arc::new(DockerClient::new(&config.api)?);
    let controller = FailoverController::new(api, &config, EventBus::new(EventBusConfig::default()));

    let preview = match controller.preview().await {
        Ok(preview) => preview,
        Err(e) => {
            eprintln!("Cluster unreachable: {}", e);
            std::process::exit(1);
        }
    };
    print_preview(&preview);
    Ok(())
}

fn print_preview(preview: &Preview) {
    match &preview.decision {
        FailoverDecision::Stable { primary } => {
            println!("Primary {} is healthy. No failover needed.", primary);
        }
        FailoverDecision::FailoverRequired {
            target_label,
            reason,
        } => {
            println!("Failover required: {}", reason);
            println!("Target label: {}", target_label);
            println!();
            for service in &preview.services {
                match &service.action {
                    PlannedAction::Apply(change) => println!(
                        "  {:<24} apply    {}",
                        service.service_name,
                        change.desired_constraints.join(", ")
                    ),
                    PlannedAction::AlreadyPlaced => {
                        println!("  {:<24} ok       already placed", service.service_name)
                    }
                    PlannedAction::OptedOut => {
                        println!("  {:<24} skip     opted out", service.service_name)
                    }
                    PlannedAction::NoEligibleTarget(detail) => {
                        println!("  {:<24} FAIL     {}", service.service_name, detail)
                    }
                }
            }
        }
    }
}

async fn status(config: SwarmwatchConfig) -> anyhow::Result<()> {
    let client = DockerClient::new(&config.api)?;
    let nodes = match client.list_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => {
            eprintln!("Cluster unreachable ({}): {}", client.endpoint(), e);
            std::process::exit(1);
        }
    };

    println!("Cluster status ({})", client.endpoint());
    println!(
        "{:<28} {:<20} {:<10} {:<8} {:<12} {}",
        "ID", "HOSTNAME", "ROLE", "HEALTH", "STATE", "AVAILABILITY"
    );
    for node in &nodes {
        let role = match config.labels.classify(node) {
            Some(NodeClass::Primary) => "primary",
            Some(NodeClass::Secondary) => "secondary",
            None => "-",
        };
        println!(
            "{:<28} {:<20} {:<10} {:<8} {:<12} {}",
            node.id,
            node.hostname,
            role,
            if node.is_healthy() { "OK" } else { "DOWN" },
            node.state,
            node.availability
        );
    }

    Ok(())
}
