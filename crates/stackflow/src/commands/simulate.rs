use anyhow::Context;
use colored::Colorize;
use stackflow_cloud::{
    ChainOutcome, CheckpointStore, DeletionPolicy, FileCheckpointStore, LifecycleRequest,
    LifecycleScheduler, MemoryCheckpointStore, ResourceAction, ResourceInfo, StackRef, Tag,
};
use stackflow_config::EngineConfig;
use stackflow_ec2::{
    SNAPSHOT_ID_FOR_DELETE, SimulatedCompute, VOLUME_RESOURCE_TYPE, VolumeAction,
    VolumeProperties,
};
use std::path::PathBuf;
use std::sync::Arc;

const STACK_ID: &str = "stack-simulated";
const STACK_NAME: &str = "simulated";
const ACCOUNT_ID: &str = "000000000000";
const USER_ID: &str = "sim-user";
const ADMIN_ID: &str = "sim-admin";
const LOGICAL_ID: &str = "Volume";

pub struct SimulateOptions {
    pub zone: String,
    pub size: i32,
    pub volume_type: Option<String>,
    pub tags: Vec<String>,
    pub policy: String,
    pub polls: u32,
    pub fail_snapshot: bool,
    pub state_dir: Option<PathBuf>,
}

pub async fn handle(config: &EngineConfig, options: SimulateOptions) -> anyhow::Result<()> {
    let policy: DeletionPolicy = options.policy.parse()?;
    let tags = options
        .tags
        .iter()
        .map(|t| Tag::parse(t).with_context(|| format!("Invalid tag '{}', expected KEY=VALUE", t)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let properties = Arc::new(VolumeProperties {
        availability_zone: options.zone,
        size: Some(options.size),
        volume_type: options.volume_type,
        tags,
        ..Default::default()
    });

    let compute = Arc::new(SimulatedCompute::new(options.polls).with_account_admin(USER_ID, ADMIN_ID));
    compute.set_fail_snapshots(options.fail_snapshot);

    let checkpoints: Arc<dyn CheckpointStore> = match &options.state_dir {
        Some(dir) => Arc::new(FileCheckpointStore::new(dir)),
        None => Arc::new(MemoryCheckpointStore::new()),
    };
    let scheduler = LifecycleScheduler::new(checkpoints).with_retry(super::retry_config(config));
    let request = LifecycleRequest::new(LOGICAL_ID, STACK_ID, ACCOUNT_ID, USER_ID);
    let timeouts = super::volume_timeouts(config);

    let info = ResourceInfo::new(LOGICAL_ID, VOLUME_RESOURCE_TYPE)
        .with_deletion_policy(policy)
        .with_stack(StackRef {
            stack_id: STACK_ID.to_string(),
            stack_name: STACK_NAME.to_string(),
            account_id: ACCOUNT_ID.to_string(),
            tags: Vec::new(),
        });
    let action = VolumeAction::new(properties.clone(), info, compute.clone(), compute.clone())
        .with_timeouts(timeouts);

    tracing::info!(
        zone = %properties.availability_zone,
        size = options.size,
        %policy,
        "Simulating volume lifecycle"
    );
    println!("{}", "Creating volume...".blue());
    let (result, info) = scheduler.create(action, &request).wait_with_info().await;
    let created = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            // Tear down whatever the failed create left behind
            if let Some(info) = info.filter(|i| i.physical_resource_id.is_some()) {
                let action = VolumeAction::new(properties, info, compute.clone(), compute.clone())
                    .with_timeouts(timeouts);
                roll_back(&scheduler, action, &request, &compute).await;
            }
            return Err(anyhow::Error::new(e).context("Volume create failed"));
        }
    };
    print_outcome(&created);
    let volume_id = created.physical_resource_id().unwrap_or("-").to_string();
    println!("  physical id: {}", volume_id.cyan());
    println!(
        "  reference:   {}",
        created.reference_value_json().unwrap_or("-")
    );

    println!();
    println!("{}", format!("Deleting volume (policy: {})...", policy).blue());
    let action = VolumeAction::new(properties, created.info, compute.clone(), compute.clone())
        .with_timeouts(timeouts);
    let deleted = scheduler
        .delete(action, &request)
        .wait()
        .await
        .context("Volume delete failed")?;
    print_outcome(&deleted);
    match deleted.info.get_attribute::<String>(SNAPSHOT_ID_FOR_DELETE) {
        Some(snapshot_id) => println!("  snapshot:    {}", snapshot_id.cyan()),
        None => println!("  snapshot:    -"),
    }
    if let Some(status) = compute.volume_status(&volume_id) {
        println!("  status:      {}", status);
    }

    Ok(())
}

async fn roll_back(
    scheduler: &LifecycleScheduler,
    action: VolumeAction,
    request: &LifecycleRequest,
    compute: &SimulatedCompute,
) {
    let volume_id = action
        .info()
        .physical_resource_id
        .clone()
        .unwrap_or_default();
    tracing::warn!("Create failed, deleting volume {}", volume_id);
    println!();
    println!("{}", format!("Rolling back volume {}...", volume_id).yellow());

    match scheduler.delete(action, request).wait().await {
        Ok(deleted) => print_outcome(&deleted),
        Err(e) => tracing::error!("Rollback of volume {} failed: {}", volume_id, e),
    }
    if let Some(status) = compute.volume_status(&volume_id) {
        println!("  status:      {}", status);
    }
}

fn print_outcome(outcome: &ChainOutcome) {
    println!("{} {}", "✓".green(), outcome);
    println!("  steps: {}", outcome.completed_steps.join(" → "));
}
