use colored::Colorize;
use stackflow_cloud::{Phase, ResourceAction, ResourceInfo, StepChain};
use stackflow_config::EngineConfig;
use stackflow_ec2::{SimulatedCompute, VOLUME_RESOURCE_TYPE, VolumeAction, VolumeProperties};
use std::sync::Arc;

pub fn handle(config: &EngineConfig, phase: Option<&str>) -> anyhow::Result<()> {
    // Chains do not touch the backend until they run
    let compute = Arc::new(SimulatedCompute::default());
    let action = VolumeAction::new(
        Arc::new(VolumeProperties::default()),
        ResourceInfo::new("Volume", VOLUME_RESOURCE_TYPE),
        compute.clone(),
        compute,
    )
    .with_timeouts(super::volume_timeouts(config));

    let phases = match phase {
        Some("create") => vec![Phase::Create],
        Some("delete") => vec![Phase::Delete],
        _ => vec![Phase::Create, Phase::Delete],
    };

    for (i, phase) in phases.into_iter().enumerate() {
        if i > 0 {
            println!();
        }
        print_chain(&action.chain(phase)?);
    }
    Ok(())
}

fn print_chain<A>(chain: &StepChain<A>) {
    println!(
        "{} {}",
        chain.resource_type().bold(),
        chain.phase().to_string().cyan()
    );
    for (n, step) in chain.steps().iter().enumerate() {
        match step.timeout() {
            Some(timeout) => println!(
                "  {}. {} {}",
                n + 1,
                step.name(),
                format!("(polled, timeout {}s)", timeout.as_secs()).dimmed()
            ),
            None => println!("  {}. {}", n + 1, step.name()),
        }
    }
}
