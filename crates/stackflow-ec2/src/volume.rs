//! `AWS::EC2::Volume` resource action
//!
//! Create: `CREATE_VOLUME` → `VERIFY_AVAILABLE` (polled) → `CREATE_TAGS`
//!
//! Delete: `CREATE_SNAPSHOT` → `VERIFY_SNAPSHOT_COMPLETE` (polled) →
//! `CREATE_SNAPSHOT_TAGS` → `DELETE_VOLUME` → `VERIFY_DELETE` (polled)
//!
//! Every delete step first checks whether the volume is already gone and
//! succeeds without doing anything if so. The snapshot steps only do work
//! under [`DeletionPolicy::Snapshot`]; nothing is touched under
//! [`DeletionPolicy::Retain`].

use crate::gateway::{
    AccountDirectory, ComputeGateway, CreateVolumeRequest, Principal, SnapshotStatus,
    VolumeInfo, VolumeStatus,
};
use serde::{Deserialize, Serialize};
use stackflow_cloud::tags::{missing_tags, system_tags, user_tags};
use stackflow_cloud::{
    DeletionPolicy, Phase, ResourceAction, ResourceInfo, Step, StepChain, StepError, StepFuture,
    Tag,
};
use std::sync::Arc;
use std::time::Duration;

pub const VOLUME_RESOURCE_TYPE: &str = "AWS::EC2::Volume";

/// Attribute holding the snapshot taken on delete
pub const SNAPSHOT_ID_FOR_DELETE: &str = "SnapshotIdForDelete";

const DEFAULT_VOLUME_TYPE: &str = "standard";

type StepResult<T> = std::result::Result<T, StepError>;

/// Desired state from the template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeProperties {
    pub availability_zone: String,
    #[serde(default)]
    pub iops: Option<i32>,
    #[serde(default)]
    pub size: Option<i32>,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub volume_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Retry windows of the polled volume steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeTimeouts {
    /// Wait for a new volume to become available
    pub available: Duration,
    /// Wait for the delete-time snapshot to complete
    pub snapshot_complete: Duration,
    /// Wait for the volume to disappear
    pub deleted: Duration,
}

impl Default for VolumeTimeouts {
    fn default() -> Self {
        Self {
            available: Duration::from_secs(300),
            snapshot_complete: Duration::from_secs(300),
            deleted: Duration::from_secs(300),
        }
    }
}

/// Lifecycle controller for one volume
pub struct VolumeAction {
    properties: Arc<VolumeProperties>,
    info: ResourceInfo,
    timeouts: VolumeTimeouts,
    compute: Arc<dyn ComputeGateway>,
    accounts: Arc<dyn AccountDirectory>,
}

impl VolumeAction {
    pub fn new(
        properties: Arc<VolumeProperties>,
        info: ResourceInfo,
        compute: Arc<dyn ComputeGateway>,
        accounts: Arc<dyn AccountDirectory>,
    ) -> Self {
        Self {
            properties,
            info,
            timeouts: VolumeTimeouts::default(),
            compute,
            accounts,
        }
    }

    pub fn with_timeouts(mut self, timeouts: VolumeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn properties(&self) -> &VolumeProperties {
        &self.properties
    }

    pub fn timeouts(&self) -> VolumeTimeouts {
        self.timeouts
    }

    fn user(&self) -> Principal {
        Principal::User(self.info.effective_user_id.clone())
    }

    fn volume_id(&self) -> StepResult<String> {
        self.info.physical_resource_id.clone().ok_or_else(|| {
            StepError::fatal(format!(
                "Volume {} has no physical resource id",
                self.info.logical_resource_id
            ))
        })
    }

    fn snapshot_id(&self) -> StepResult<String> {
        self.info
            .get_attribute::<String>(SNAPSHOT_ID_FOR_DELETE)
            .ok_or_else(|| {
                StepError::fatal(format!(
                    "No snapshot recorded for volume {}",
                    self.info.physical_resource_id.as_deref().unwrap_or("-")
                ))
            })
    }

    /// Describe the volume; a failed describe is a validation error, not "not ready"
    async fn describe(&self, volume_id: &str) -> StepResult<Option<VolumeInfo>> {
        self.compute
            .describe_volume(&self.user(), volume_id)
            .await
            .map_err(|e| {
                StepError::validation(format!(
                    "Error describing volume {}:{}",
                    volume_id,
                    e.upstream_message()
                ))
            })
    }

    /// True when there is nothing left to delete
    async fn volume_deleted(&self) -> StepResult<bool> {
        let Some(volume_id) = self.info.physical_resource_id.as_deref() else {
            return Ok(true);
        };
        Ok(match self.describe(volume_id).await? {
            None => true,
            Some(volume) => volume.status == VolumeStatus::Deleted,
        })
    }

    /// Apply system tags as the account admin and user tags as the owner,
    /// issuing only tags the resource does not already carry.
    async fn apply_tags(&self, resource_id: &str) -> StepResult<()> {
        let user_tags = user_tags(&self.info, &self.properties.tags)?;

        let admin = self
            .accounts
            .account_admin(&self.info.effective_user_id)
            .await?;
        let privileged = Principal::Privileged(admin);
        let existing = self.compute.describe_tags(&privileged, resource_id).await?;
        let resources = [resource_id.to_string()];

        let system = missing_tags(&system_tags(&self.info), &existing);
        if !system.is_empty() {
            self.compute
                .create_tags(&privileged, &resources, &system)
                .await?;
        }

        let user = missing_tags(&user_tags, &existing);
        if !user.is_empty() {
            self.compute
                .create_tags(&self.user(), &resources, &user)
                .await?;
        }

        tracing::debug!(
            "Tagged {} ({} system, {} user)",
            resource_id,
            system.len(),
            user.len()
        );
        Ok(())
    }

    fn client_token(&self) -> String {
        format!("{}/{}", self.info.stack.stack_id, self.info.logical_resource_id)
    }
}

fn create_volume(action: &mut VolumeAction) -> StepFuture<'_> {
    Box::pin(async move {
        if let Some(volume_id) = &action.info.physical_resource_id {
            tracing::debug!("Volume {} already created", volume_id);
            return Ok(());
        }

        let properties = &action.properties;
        let request = CreateVolumeRequest {
            availability_zone: properties.availability_zone.clone(),
            size: properties.size,
            iops: properties.iops,
            snapshot_id: properties.snapshot_id.clone(),
            volume_type: properties
                .volume_type
                .clone()
                .unwrap_or_else(|| DEFAULT_VOLUME_TYPE.to_string()),
            client_token: Some(action.client_token()),
        };

        let volume = action.compute.create_volume(&action.user(), &request).await?;
        tracing::info!("Created volume {}", volume.volume_id);
        action.info.set_physical_resource_id(volume.volume_id)?;
        Ok(())
    })
}

fn verify_available(action: &mut VolumeAction) -> StepFuture<'_> {
    Box::pin(async move {
        let volume_id = action.volume_id()?;
        match action.describe(&volume_id).await? {
            Some(volume) if volume.status == VolumeStatus::Available => Ok(()),
            Some(volume) if volume.status == VolumeStatus::Error => Err(StepError::fatal(format!(
                "Volume {} entered error state",
                volume_id
            ))),
            _ => Err(StepError::not_ready(format!(
                "Volume {} not yet available",
                volume_id
            ))),
        }
    })
}

fn create_tags(action: &mut VolumeAction) -> StepFuture<'_> {
    Box::pin(async move {
        let volume_id = action.volume_id()?;
        action.apply_tags(&volume_id).await
    })
}

fn create_snapshot(action: &mut VolumeAction) -> StepFuture<'_> {
    Box::pin(async move {
        if action.volume_deleted().await? {
            return Ok(());
        }
        if action.info.deletion_policy != DeletionPolicy::Snapshot {
            return Ok(());
        }
        if let Some(snapshot_id) = action.info.get_attribute::<String>(SNAPSHOT_ID_FOR_DELETE) {
            tracing::debug!("Snapshot {} already requested", snapshot_id);
            return Ok(());
        }

        let volume_id = action.volume_id()?;
        let token = action.client_token();
        let snapshot = action
            .compute
            .create_snapshot(&action.user(), &volume_id, Some(&token))
            .await?;
        if snapshot.snapshot_id.is_empty() {
            return Err(StepError::fatal(format!(
                "Unable to create snapshot on delete for volume {}",
                volume_id
            )));
        }

        tracing::info!("Snapshotting volume {} as {}", volume_id, snapshot.snapshot_id);
        action.info.set_attribute(
            SNAPSHOT_ID_FOR_DELETE,
            serde_json::Value::String(snapshot.snapshot_id),
        );
        Ok(())
    })
}

fn verify_snapshot_complete(action: &mut VolumeAction) -> StepFuture<'_> {
    Box::pin(async move {
        if action.volume_deleted().await? {
            return Ok(());
        }
        if action.info.deletion_policy != DeletionPolicy::Snapshot {
            return Ok(());
        }

        let volume_id = action.volume_id()?;
        let snapshot_id = action.snapshot_id()?;
        let snapshot = action
            .compute
            .describe_snapshot(&action.user(), &snapshot_id)
            .await
            .map_err(|e| {
                StepError::validation(format!(
                    "Error describing snapshot {}:{}",
                    snapshot_id,
                    e.upstream_message()
                ))
            })?;

        match snapshot.map(|s| s.status) {
            Some(SnapshotStatus::Completed) => Ok(()),
            Some(SnapshotStatus::Error) => Err(StepError::fatal(format!(
                "Error creating snapshot {}, while deleting volume {}",
                snapshot_id, volume_id
            ))),
            _ => Err(StepError::not_ready(format!(
                "Snapshot {} not yet complete",
                snapshot_id
            ))),
        }
    })
}

fn create_snapshot_tags(action: &mut VolumeAction) -> StepFuture<'_> {
    Box::pin(async move {
        if action.volume_deleted().await? {
            return Ok(());
        }
        if action.info.deletion_policy != DeletionPolicy::Snapshot {
            return Ok(());
        }
        let snapshot_id = action.snapshot_id()?;
        action.apply_tags(&snapshot_id).await
    })
}

fn delete_volume(action: &mut VolumeAction) -> StepFuture<'_> {
    Box::pin(async move {
        if action.volume_deleted().await? {
            return Ok(());
        }
        if action.info.deletion_policy == DeletionPolicy::Retain {
            tracing::info!("Retaining volume {:?}", action.info.physical_resource_id);
            return Ok(());
        }

        let volume_id = action.volume_id()?;
        action.compute.delete_volume(&action.user(), &volume_id).await?;
        tracing::info!("Deleting volume {}", volume_id);
        Ok(())
    })
}

fn verify_delete(action: &mut VolumeAction) -> StepFuture<'_> {
    Box::pin(async move {
        if action.info.deletion_policy == DeletionPolicy::Retain {
            return Ok(());
        }
        if action.volume_deleted().await? {
            return Ok(());
        }
        Err(StepError::not_ready(format!(
            "Volume {} not yet deleted",
            action.volume_id()?
        )))
    })
}

impl ResourceAction for VolumeAction {
    fn resource_type(&self) -> &str {
        VOLUME_RESOURCE_TYPE
    }

    fn info(&self) -> &ResourceInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ResourceInfo {
        &mut self.info
    }

    fn create_chain(&self) -> stackflow_cloud::Result<StepChain<Self>> {
        StepChain::new(
            VOLUME_RESOURCE_TYPE,
            Phase::Create,
            vec![
                Step::one_shot("CREATE_VOLUME", create_volume),
                Step::pollable("VERIFY_AVAILABLE", self.timeouts.available, verify_available),
                Step::one_shot("CREATE_TAGS", create_tags),
            ],
        )
    }

    fn delete_chain(&self) -> stackflow_cloud::Result<StepChain<Self>> {
        StepChain::new(
            VOLUME_RESOURCE_TYPE,
            Phase::Delete,
            vec![
                Step::one_shot("CREATE_SNAPSHOT", create_snapshot),
                Step::pollable(
                    "VERIFY_SNAPSHOT_COMPLETE",
                    self.timeouts.snapshot_complete,
                    verify_snapshot_complete,
                ),
                Step::one_shot("CREATE_SNAPSHOT_TAGS", create_snapshot_tags),
                Step::one_shot("DELETE_VOLUME", delete_volume),
                Step::pollable("VERIFY_DELETE", self.timeouts.deleted, verify_delete),
            ],
        )
    }
}
