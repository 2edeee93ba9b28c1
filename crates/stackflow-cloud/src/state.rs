//! Observed resource state and durable checkpoints
//!
//! [`ResourceInfo`] is the per-resource state carried across steps. After
//! every completed step the executor writes a [`Checkpoint`] so a restarted
//! scheduler can re-enter the chain where it stopped.

use crate::error::{CloudError, Result, StepError};
use crate::tags::Tag;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const CHECKPOINT_VERSION: u32 = 1;
const STATE_DIR: &str = ".stackflow";
const CHECKPOINT_FILE: &str = "checkpoints.json";
const CHECKPOINT_BACKUP: &str = "checkpoints.json.backup";

/// What happens to a resource's backing data when it is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeletionPolicy {
    /// Delete the resource (default)
    #[default]
    Delete,
    /// Snapshot the resource, then delete it
    Snapshot,
    /// Leave the resource in place
    Retain,
}

impl std::str::FromStr for DeletionPolicy {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "delete" => Ok(Self::Delete),
            "snapshot" => Ok(Self::Snapshot),
            "retain" => Ok(Self::Retain),
            _ => Err(CloudError::InvalidConfig(format!(
                "Unknown deletion policy '{}' (expected delete, snapshot or retain)",
                s
            ))),
        }
    }
}

impl std::fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeletionPolicy::Delete => write!(f, "Delete"),
            DeletionPolicy::Snapshot => write!(f, "Snapshot"),
            DeletionPolicy::Retain => write!(f, "Retain"),
        }
    }
}

/// The stack a resource belongs to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackRef {
    pub stack_id: String,
    pub stack_name: String,
    pub account_id: String,
    /// Stack-level tags propagated to taggable resources
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Observed state of one resource within a lifecycle run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// Logical id from the template
    pub logical_resource_id: String,

    /// Resource type (e.g., "AWS::EC2::Volume")
    pub resource_type: String,

    /// Provider-assigned id; `None` until the create step succeeds
    pub physical_resource_id: Option<String>,

    /// Serialized id exposed to dependent resources
    pub reference_value_json: Option<String>,

    /// Principal the lifecycle runs as
    pub effective_user_id: String,

    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    #[serde(default)]
    pub stack: StackRef,

    /// Lifecycle-scoped scratch fields, addressable by name
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,

    pub updated_at: DateTime<Utc>,
}

impl ResourceInfo {
    pub fn new(logical_resource_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            logical_resource_id: logical_resource_id.into(),
            resource_type: resource_type.into(),
            physical_resource_id: None,
            reference_value_json: None,
            effective_user_id: String::new(),
            deletion_policy: DeletionPolicy::default(),
            stack: StackRef::default(),
            attributes: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = policy;
        self
    }

    pub fn with_stack(mut self, stack: StackRef) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_physical_resource_id(mut self, id: impl Into<String>) -> Self {
        self.physical_resource_id = Some(id.into());
        self
    }

    /// Record the provider id and derive the reference value from it.
    ///
    /// Once set, the id cannot change within a lifecycle run.
    pub fn set_physical_resource_id(
        &mut self,
        id: impl Into<String>,
    ) -> std::result::Result<(), StepError> {
        let id = id.into();
        match &self.physical_resource_id {
            Some(existing) if *existing != id => Err(StepError::fatal(format!(
                "Physical resource id of {} is already {}, refusing to replace it with {}",
                self.logical_resource_id, existing, id
            ))),
            _ => {
                self.reference_value_json = Some(serde_json::Value::String(id.clone()).to_string());
                self.physical_resource_id = Some(id);
                self.updated_at = Utc::now();
                Ok(())
            }
        }
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
        self.updated_at = Utc::now();
    }

    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<serde_json::Value> {
        let removed = self.attributes.remove(key);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }
}

/// Lifecycle phase of a step chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Create,
    Delete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Create => write!(f, "create"),
            Phase::Delete => write!(f, "delete"),
        }
    }
}

/// Progress of one chain, saved after each completed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub phase: Phase,

    /// Step to run next; `None` once the chain has finished
    pub next_step: Option<String>,

    pub info: ResourceInfo,

    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(phase: Phase, next_step: Option<String>, info: ResourceInfo) -> Self {
        Self {
            phase,
            next_step,
            info,
            updated_at: Utc::now(),
        }
    }

    /// Key a checkpoint is stored under
    pub fn key(info: &ResourceInfo, phase: Phase) -> String {
        format!("{}:{}:{}", info.stack.stack_id, info.logical_resource_id, phase)
    }
}

/// Durable store for chain progress
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, key: &str, checkpoint: &Checkpoint) -> Result<()>;

    async fn load(&self, key: &str) -> Result<Option<Checkpoint>>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-process checkpoint store
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.lock().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, key: &str, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .lock()
            .await
            .insert(key.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.lock().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.checkpoints.lock().await.remove(key);
        Ok(())
    }
}

/// On-disk layout of the checkpoint file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    updated_at: DateTime<Utc>,
    checkpoints: HashMap<String, Checkpoint>,
}

impl Default for CheckpointFile {
    fn default() -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            updated_at: Utc::now(),
            checkpoints: HashMap::new(),
        }
    }
}

/// Checkpoint store backed by `.stackflow/checkpoints.json`
pub struct FileCheckpointStore {
    project_root: PathBuf,
    /// Serializes read-modify-write cycles within the process
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.state_dir().join(CHECKPOINT_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(CHECKPOINT_BACKUP)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Falls back to the backup when an interrupted write left no main file
    async fn read_file(&self) -> Result<CheckpointFile> {
        let mut path = self.checkpoint_path();
        if !path.exists() {
            let backup = self.backup_path();
            if !backup.exists() {
                return Ok(CheckpointFile::default());
            }
            tracing::warn!("Checkpoint file missing, reading backup {}", backup.display());
            path = backup;
        }

        let content = fs::read_to_string(&path).await?;
        let file: CheckpointFile = serde_json::from_str(&content)?;

        if file.version > CHECKPOINT_VERSION {
            return Err(CloudError::CheckpointError(format!(
                "Checkpoint file version {} is newer than supported version {}",
                file.version, CHECKPOINT_VERSION
            )));
        }

        Ok(file)
    }

    async fn write_file(&self, file: &CheckpointFile) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.checkpoint_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(file)?;
        fs::write(&path, content).await?;

        tracing::debug!("Saved {} checkpoints", file.checkpoints.len());
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, key: &str, checkpoint: &Checkpoint) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        file.checkpoints.insert(key.to_string(), checkpoint.clone());
        file.updated_at = Utc::now();
        self.write_file(&file).await
    }

    async fn load(&self, key: &str) -> Result<Option<Checkpoint>> {
        let _guard = self.write_lock.lock().await;
        let file = self.read_file().await?;
        Ok(file.checkpoints.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        if file.checkpoints.remove(key).is_some() {
            file.updated_at = Utc::now();
            self.write_file(&file).await?;
        }
        Ok(())
    }
}
