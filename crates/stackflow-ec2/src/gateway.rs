//! Compute gateway
//!
//! The calls a compute resource action issues against the provider. Wire
//! encoding and transport belong to the implementation.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stackflow_cloud::Tag;

/// Identity a request is issued under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    /// The stack owner's effective user
    User(String),
    /// Account administrator, for system-owned writes
    Privileged(String),
}

impl Principal {
    pub fn user_id(&self) -> &str {
        match self {
            Principal::User(id) | Principal::Privileged(id) => id,
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, Principal::Privileged(_))
    }
}

/// Parameters of a create-volume call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    pub availability_zone: String,
    pub size: Option<i32>,
    pub iops: Option<i32>,
    pub snapshot_id: Option<String>,
    pub volume_type: String,
    /// Idempotency token; repeating a request with the same token returns
    /// the volume it created the first time
    pub client_token: Option<String>,
}

/// Volume status as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeStatus {
    Creating,
    Available,
    InUse,
    Deleting,
    Deleted,
    Error,
    #[serde(untagged)]
    Other(String),
}

impl VolumeStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "creating" => Self::Creating,
            "available" => Self::Available,
            "in-use" => Self::InUse,
            "deleting" => Self::Deleting,
            "deleted" => Self::Deleted,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeStatus::Creating => write!(f, "creating"),
            VolumeStatus::Available => write!(f, "available"),
            VolumeStatus::InUse => write!(f, "in-use"),
            VolumeStatus::Deleting => write!(f, "deleting"),
            VolumeStatus::Deleted => write!(f, "deleted"),
            VolumeStatus::Error => write!(f, "error"),
            VolumeStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Snapshot status as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotStatus {
    Pending,
    Completed,
    Error,
    #[serde(untagged)]
    Other(String),
}

impl SnapshotStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotStatus::Pending => write!(f, "pending"),
            SnapshotStatus::Completed => write!(f, "completed"),
            SnapshotStatus::Error => write!(f, "error"),
            SnapshotStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub volume_id: String,
    pub status: VolumeStatus,
    pub availability_zone: String,
    pub size: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub snapshot_id: String,
    pub volume_id: String,
    pub status: SnapshotStatus,
}

/// Compute API
#[async_trait]
pub trait ComputeGateway: Send + Sync {
    async fn create_volume(
        &self,
        principal: &Principal,
        request: &CreateVolumeRequest,
    ) -> Result<VolumeInfo>;

    /// `None` when no volume with this id is visible
    async fn describe_volume(&self, principal: &Principal, volume_id: &str)
    -> Result<Option<VolumeInfo>>;

    async fn delete_volume(&self, principal: &Principal, volume_id: &str) -> Result<()>;

    /// A repeated `client_token` returns the snapshot first created with it
    async fn create_snapshot(
        &self,
        principal: &Principal,
        volume_id: &str,
        client_token: Option<&str>,
    ) -> Result<SnapshotInfo>;

    /// `None` when no snapshot with this id is visible
    async fn describe_snapshot(
        &self,
        principal: &Principal,
        snapshot_id: &str,
    ) -> Result<Option<SnapshotInfo>>;

    async fn describe_tags(&self, principal: &Principal, resource_id: &str) -> Result<Vec<Tag>>;

    async fn create_tags(
        &self,
        principal: &Principal,
        resource_ids: &[String],
        tags: &[Tag],
    ) -> Result<()>;
}

/// Account lookups used to derive the privileged principal
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// User id of the administrator of the account that owns `user_id`
    async fn account_admin(&self, user_id: &str) -> Result<String>;
}
