//! In-memory compute backend
//!
//! Volumes and snapshots settle after a configurable number of describe
//! polls. Every call is recorded so callers can assert on exactly what was
//! issued. Used by the CLI's `simulate` command and by tests.

use crate::error::{Ec2Error, Result};
use crate::gateway::{
    AccountDirectory, ComputeGateway, CreateVolumeRequest, Principal, SnapshotInfo,
    SnapshotStatus, VolumeInfo, VolumeStatus,
};
use async_trait::async_trait;
use stackflow_cloud::Tag;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// A call issued against the simulated backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateVolume { client_token: Option<String> },
    DescribeVolume(String),
    DeleteVolume(String),
    CreateSnapshot {
        volume_id: String,
        client_token: Option<String>,
    },
    DescribeSnapshot(String),
    DescribeTags(String),
    CreateTags {
        principal: Principal,
        resource_ids: Vec<String>,
        tags: Vec<Tag>,
    },
}

#[derive(Debug)]
struct SimVolume {
    info: VolumeInfo,
    polls: u32,
}

#[derive(Debug)]
struct SimSnapshot {
    info: SnapshotInfo,
    polls: u32,
}

#[derive(Debug, Default)]
struct SimState {
    next_id: u64,
    volumes: HashMap<String, SimVolume>,
    snapshots: HashMap<String, SimSnapshot>,
    tags: HashMap<String, Vec<Tag>>,
    client_tokens: HashMap<String, String>,
    snapshot_tokens: HashMap<String, String>,
    admins: HashMap<String, String>,
    calls: Vec<Call>,
    fail_describe: bool,
    fail_snapshots: bool,
    stuck_volumes: bool,
}

impl SimState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:08x}", prefix, self.next_id)
    }
}

/// Simulated compute provider
#[derive(Debug)]
pub struct SimulatedCompute {
    state: Mutex<SimState>,
    polls_to_settle: u32,
}

impl Default for SimulatedCompute {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SimulatedCompute {
    /// Resources settle on the `polls_to_settle`-th describe
    pub fn new(polls_to_settle: u32) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            polls_to_settle: polls_to_settle.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the account admin for a user
    pub fn with_account_admin(self, user_id: impl Into<String>, admin_id: impl Into<String>) -> Self {
        self.state().admins.insert(user_id.into(), admin_id.into());
        self
    }

    /// Make every describe fail at the transport level
    pub fn set_fail_describe(&self, fail: bool) {
        self.state().fail_describe = fail;
    }

    /// Make snapshots settle into `error`
    pub fn set_fail_snapshots(&self, fail: bool) {
        self.state().fail_snapshots = fail;
    }

    /// Keep volumes in their transitional state forever
    pub fn set_stuck_volumes(&self, stuck: bool) {
        self.state().stuck_volumes = stuck;
    }

    /// Seed an already-available volume
    pub fn insert_volume(&self, volume_id: impl Into<String>, availability_zone: impl Into<String>) {
        let volume_id = volume_id.into();
        let info = VolumeInfo {
            volume_id: volume_id.clone(),
            status: VolumeStatus::Available,
            availability_zone: availability_zone.into(),
            size: None,
        };
        self.state()
            .volumes
            .insert(volume_id, SimVolume { info, polls: 0 });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| matches(c)).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn volume_status(&self, volume_id: &str) -> Option<VolumeStatus> {
        self.state()
            .volumes
            .get(volume_id)
            .map(|v| v.info.status.clone())
    }

    pub fn tags_of(&self, resource_id: &str) -> Vec<Tag> {
        self.state()
            .tags
            .get(resource_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn volume_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state().volumes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn snapshot_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state().snapshots.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ComputeGateway for SimulatedCompute {
    async fn create_volume(
        &self,
        _principal: &Principal,
        request: &CreateVolumeRequest,
    ) -> Result<VolumeInfo> {
        let mut state = self.state();
        state.calls.push(Call::CreateVolume {
            client_token: request.client_token.clone(),
        });

        if request.availability_zone.is_empty() {
            return Err(Ec2Error::InvalidParameter(
                "AvailabilityZone is required".to_string(),
            ));
        }
        if request.size.is_none() && request.snapshot_id.is_none() {
            return Err(Ec2Error::InvalidParameter(
                "Either Size or SnapshotId must be specified".to_string(),
            ));
        }

        if let Some(token) = &request.client_token {
            if let Some(existing) = state.client_tokens.get(token).cloned() {
                if let Some(volume) = state.volumes.get(&existing) {
                    return Ok(volume.info.clone());
                }
            }
        }

        let volume_id = state.next_id("vol");
        let info = VolumeInfo {
            volume_id: volume_id.clone(),
            status: VolumeStatus::Creating,
            availability_zone: request.availability_zone.clone(),
            size: request.size,
        };
        state.volumes.insert(
            volume_id.clone(),
            SimVolume {
                info: info.clone(),
                polls: 0,
            },
        );
        if let Some(token) = &request.client_token {
            state.client_tokens.insert(token.clone(), volume_id);
        }
        Ok(info)
    }

    async fn describe_volume(
        &self,
        _principal: &Principal,
        volume_id: &str,
    ) -> Result<Option<VolumeInfo>> {
        let polls_to_settle = self.polls_to_settle;
        let mut state = self.state();
        state.calls.push(Call::DescribeVolume(volume_id.to_string()));

        if state.fail_describe {
            return Err(Ec2Error::Transport("Service Unavailable".to_string()));
        }
        let stuck = state.stuck_volumes;

        let Some(volume) = state.volumes.get_mut(volume_id) else {
            return Ok(None);
        };
        volume.polls += 1;
        let settled = !stuck && volume.polls >= polls_to_settle;

        match volume.info.status {
            VolumeStatus::Creating if settled => volume.info.status = VolumeStatus::Available,
            VolumeStatus::Deleting if settled => volume.info.status = VolumeStatus::Deleted,
            VolumeStatus::Deleted => {
                // Deleted volumes are reported once, then disappear
                state.volumes.remove(volume_id);
                state.tags.remove(volume_id);
                return Ok(None);
            }
            _ => {}
        }

        Ok(state.volumes.get(volume_id).map(|v| v.info.clone()))
    }

    async fn delete_volume(&self, _principal: &Principal, volume_id: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::DeleteVolume(volume_id.to_string()));

        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| Ec2Error::VolumeNotFound(volume_id.to_string()))?;
        if volume.info.status != VolumeStatus::Deleted {
            volume.info.status = VolumeStatus::Deleting;
            volume.polls = 0;
        }
        Ok(())
    }

    async fn create_snapshot(
        &self,
        _principal: &Principal,
        volume_id: &str,
        client_token: Option<&str>,
    ) -> Result<SnapshotInfo> {
        let mut state = self.state();
        state.calls.push(Call::CreateSnapshot {
            volume_id: volume_id.to_string(),
            client_token: client_token.map(str::to_string),
        });

        if let Some(token) = client_token {
            let existing = state
                .snapshot_tokens
                .get(token)
                .and_then(|id| state.snapshots.get(id))
                .map(|snapshot| snapshot.info.clone());
            if let Some(info) = existing {
                return Ok(info);
            }
        }

        if !state.volumes.contains_key(volume_id) {
            return Err(Ec2Error::VolumeNotFound(volume_id.to_string()));
        }

        let snapshot_id = state.next_id("snap");
        if let Some(token) = client_token {
            state
                .snapshot_tokens
                .insert(token.to_string(), snapshot_id.clone());
        }
        let info = SnapshotInfo {
            snapshot_id: snapshot_id.clone(),
            volume_id: volume_id.to_string(),
            status: SnapshotStatus::Pending,
        };
        state.snapshots.insert(
            snapshot_id,
            SimSnapshot {
                info: info.clone(),
                polls: 0,
            },
        );
        Ok(info)
    }

    async fn describe_snapshot(
        &self,
        _principal: &Principal,
        snapshot_id: &str,
    ) -> Result<Option<SnapshotInfo>> {
        let polls_to_settle = self.polls_to_settle;
        let mut state = self.state();
        state
            .calls
            .push(Call::DescribeSnapshot(snapshot_id.to_string()));

        if state.fail_describe {
            return Err(Ec2Error::Transport("Service Unavailable".to_string()));
        }
        let fail = state.fail_snapshots;

        let Some(snapshot) = state.snapshots.get_mut(snapshot_id) else {
            return Ok(None);
        };
        snapshot.polls += 1;
        if snapshot.info.status == SnapshotStatus::Pending && snapshot.polls >= polls_to_settle {
            snapshot.info.status = if fail {
                SnapshotStatus::Error
            } else {
                SnapshotStatus::Completed
            };
        }
        Ok(Some(snapshot.info.clone()))
    }

    async fn describe_tags(&self, _principal: &Principal, resource_id: &str) -> Result<Vec<Tag>> {
        let mut state = self.state();
        state.calls.push(Call::DescribeTags(resource_id.to_string()));
        Ok(state.tags.get(resource_id).cloned().unwrap_or_default())
    }

    async fn create_tags(
        &self,
        principal: &Principal,
        resource_ids: &[String],
        tags: &[Tag],
    ) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::CreateTags {
            principal: principal.clone(),
            resource_ids: resource_ids.to_vec(),
            tags: tags.to_vec(),
        });

        for resource_id in resource_ids {
            let current = state.tags.entry(resource_id.clone()).or_default();
            for tag in tags {
                match current.iter_mut().find(|t| t.key == tag.key) {
                    Some(existing) => existing.value = tag.value.clone(),
                    None => current.push(tag.clone()),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for SimulatedCompute {
    async fn account_admin(&self, user_id: &str) -> Result<String> {
        self.state()
            .admins
            .get(user_id)
            .cloned()
            .ok_or_else(|| Ec2Error::AccountNotFound(user_id.to_string()))
    }
}
