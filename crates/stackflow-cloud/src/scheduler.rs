//! Lifecycle scheduling
//!
//! Spawns one task per resource lifecycle and hands back a
//! [`LifecycleHandle`] that resolves to the chain outcome. A failed run
//! still hands back the resource state its completed steps produced, so the
//! caller can roll back with the delete chain. Fan-out across resources and
//! dependency ordering belong to the caller.

use crate::action::{ChainOutcome, ResourceAction};
use crate::error::LifecycleError;
use crate::executor::{LifecycleExecutor, RetryConfig};
use crate::state::{Checkpoint, CheckpointStore, Phase, ResourceInfo};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Identity of a lifecycle run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleRequest {
    pub logical_resource_id: String,
    pub stack_id: String,
    pub account_id: String,
    pub effective_user_id: String,
}

impl LifecycleRequest {
    pub fn new(
        logical_resource_id: impl Into<String>,
        stack_id: impl Into<String>,
        account_id: impl Into<String>,
        effective_user_id: impl Into<String>,
    ) -> Self {
        Self {
            logical_resource_id: logical_resource_id.into(),
            stack_id: stack_id.into(),
            account_id: account_id.into(),
            effective_user_id: effective_user_id.into(),
        }
    }

    /// Stamp this request's identity into the resource state
    pub fn apply(&self, info: &mut ResourceInfo) {
        info.logical_resource_id = self.logical_resource_id.clone();
        info.stack.stack_id = self.stack_id.clone();
        info.stack.account_id = self.account_id.clone();
        info.effective_user_id = self.effective_user_id.clone();
    }
}

/// Handle to a spawned lifecycle run
pub struct LifecycleHandle {
    resource: String,
    phase: Phase,
    cancel: CancellationToken,
    join: JoinHandle<(Result<ChainOutcome, LifecycleError>, ResourceInfo)>,
}

impl LifecycleHandle {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Ask the run to stop at its next step boundary or backoff wait
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to finish
    pub async fn wait(self) -> Result<ChainOutcome, LifecycleError> {
        self.wait_with_info().await.0
    }

    /// Wait for the run to finish, keeping the final resource state.
    ///
    /// The state is `None` only when the task itself was lost (panic or
    /// runtime shutdown).
    pub async fn wait_with_info(
        self,
    ) -> (Result<ChainOutcome, LifecycleError>, Option<ResourceInfo>) {
        match self.join.await {
            Ok((result, info)) => (result, Some(info)),
            Err(e) if e.is_panic() => (
                Err(LifecycleError::Fatal {
                    step: String::new(),
                    message: format!("{} {} panicked", self.resource, self.phase),
                }),
                None,
            ),
            Err(e) => (
                Err(LifecycleError::Aborted(format!(
                    "{} {}: {}",
                    self.resource, self.phase, e
                ))),
                None,
            ),
        }
    }
}

/// Spawns lifecycle runs with shared retry policy, checkpoint store, and cancellation
pub struct LifecycleScheduler {
    retry: RetryConfig,
    checkpoints: Arc<dyn CheckpointStore>,
    root: CancellationToken,
}

impl LifecycleScheduler {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            retry: RetryConfig::default(),
            checkpoints,
            root: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run the create chain of `action`
    pub fn create<A: ResourceAction>(&self, action: A, request: &LifecycleRequest) -> LifecycleHandle {
        self.spawn(action, request, Phase::Create, None)
    }

    /// Run the delete chain of `action`
    pub fn delete<A: ResourceAction>(&self, action: A, request: &LifecycleRequest) -> LifecycleHandle {
        self.spawn(action, request, Phase::Delete, None)
    }

    /// Re-enter a chain from its last checkpoint, or from the first step if
    /// no checkpoint exists.
    ///
    /// A delete with no checkpoint of its own starts from the state an
    /// interrupted create left behind, so a half-created resource can still
    /// be torn down.
    pub async fn resume<A: ResourceAction>(
        &self,
        mut action: A,
        request: &LifecycleRequest,
        phase: Phase,
    ) -> Result<LifecycleHandle, LifecycleError> {
        let mut identity = action.info().clone();
        request.apply(&mut identity);
        let key = Checkpoint::key(&identity, phase);

        let resume_at = match self.load_checkpoint(&key).await? {
            Some(checkpoint) if checkpoint.phase == phase => {
                tracing::info!(
                    "Restoring {} from checkpoint at {:?}",
                    key,
                    checkpoint.next_step
                );
                action.restore(checkpoint.info);
                checkpoint.next_step
            }
            _ if phase == Phase::Delete => {
                let create_key = Checkpoint::key(&identity, Phase::Create);
                if let Some(checkpoint) = self.load_checkpoint(&create_key).await? {
                    tracing::info!("Deleting from interrupted create checkpoint {}", create_key);
                    action.restore(checkpoint.info);
                }
                None
            }
            _ => None,
        };

        Ok(self.spawn(action, request, phase, resume_at))
    }

    /// Cancel every run spawned by this scheduler
    pub fn shutdown(&self) {
        tracing::info!("Cancelling all lifecycle runs");
        self.root.cancel();
    }

    async fn load_checkpoint(&self, key: &str) -> Result<Option<Checkpoint>, LifecycleError> {
        self.checkpoints
            .load(key)
            .await
            .map_err(|source| LifecycleError::Checkpoint {
                step: String::new(),
                source,
            })
    }

    fn spawn<A: ResourceAction>(
        &self,
        mut action: A,
        request: &LifecycleRequest,
        phase: Phase,
        resume_at: Option<String>,
    ) -> LifecycleHandle {
        request.apply(action.info_mut());

        let cancel = self.root.child_token();
        let executor = LifecycleExecutor::new()
            .with_retry(self.retry.clone())
            .with_checkpoints(Arc::clone(&self.checkpoints))
            .with_cancellation(cancel.clone());

        let checkpoints = Arc::clone(&self.checkpoints);
        let join = tokio::spawn(async move {
            let result = match action.chain(phase) {
                Ok(chain) => {
                    executor
                        .execute(&chain, &mut action, resume_at.as_deref())
                        .await
                }
                Err(e) => Err(LifecycleError::InvalidChain(e)),
            };

            // A deleted resource has no create left to resume
            if phase == Phase::Delete && result.is_ok() {
                let key = Checkpoint::key(action.info(), Phase::Create);
                if let Err(e) = checkpoints.remove(&key).await {
                    tracing::warn!("Failed to remove checkpoint {}: {}", key, e);
                }
            }

            let info = action.info().clone();
            (result, info)
        });

        LifecycleHandle {
            resource: request.logical_resource_id.clone(),
            phase,
            cancel,
            join,
        }
    }
}
