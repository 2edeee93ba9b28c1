//! Lifecycle executor
//!
//! Drives a [`StepChain`] against a [`ResourceAction`]:
//!
//! - steps run strictly in order, one at a time
//! - `NotReady` from a pollable step is retried with capped exponential
//!   backoff until the step's timeout, measured from its first attempt
//! - `Validation` and `Fatal` abort the chain immediately
//! - cancellation is observed between steps and during backoff waits
//! - progress is checkpointed after every completed step

use crate::action::{ChainOutcome, ResourceAction};
use crate::error::{LifecycleError, StepError};
use crate::state::{Checkpoint, CheckpointStore, Phase, ResourceInfo};
use crate::step::{Step, StepChain};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Lower bound on a backoff wait
const MIN_BACKOFF: Duration = Duration::from_millis(10);

/// Backoff between attempts of a pollable step
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fixed delay between attempts
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay after the given zero-based failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(64) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped).max(MIN_BACKOFF)
    }
}

/// Runs step chains to completion
#[derive(Clone, Default)]
pub struct LifecycleExecutor {
    retry: RetryConfig,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    cancel: CancellationToken,
}

impl LifecycleExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `chain` against `action`, starting at `resume_at` or at the first step.
    ///
    /// When resuming, `action` must already carry the state produced by the
    /// steps before `resume_at`; those steps are not run again.
    #[tracing::instrument(
        name = "lifecycle",
        skip_all,
        fields(
            resource_type = %chain.resource_type(),
            phase = %chain.phase(),
            resource = %action.info().logical_resource_id,
        )
    )]
    pub async fn execute<A: ResourceAction>(
        &self,
        chain: &StepChain<A>,
        action: &mut A,
        resume_at: Option<&str>,
    ) -> Result<ChainOutcome, LifecycleError> {
        let started = Instant::now();
        let start_index = match resume_at {
            Some(name) => chain
                .position(name)
                .ok_or_else(|| LifecycleError::UnknownStep(name.to_string()))?,
            None => 0,
        };

        if start_index > 0 {
            tracing::info!("Resuming at step {}", chain.steps()[start_index].name());
        }

        let mut completed_steps = Vec::with_capacity(chain.len() - start_index);

        for (index, step) in chain.steps().iter().enumerate().skip(start_index) {
            if self.cancel.is_cancelled() {
                tracing::warn!("Cancelled before step {}", step.name());
                return Err(LifecycleError::Cancelled {
                    next_step: step.name().to_string(),
                });
            }

            let attempts = self.run_step(step, action).await?;
            tracing::info!(step = step.name(), attempts, "Step complete");
            completed_steps.push(step.name().to_string());

            let next_step = chain.steps().get(index + 1).map(|s| s.name().to_string());
            if next_step.is_some() {
                self.save_checkpoint(chain.phase(), next_step, action.info(), step.name())
                    .await?;
            }
        }

        self.clear_checkpoint(chain.phase(), action.info()).await;

        let outcome = ChainOutcome {
            resource_type: chain.resource_type().to_string(),
            phase: chain.phase(),
            completed_steps,
            info: action.info().clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!("{}", outcome);
        Ok(outcome)
    }

    /// Perform one step, retrying while it is pollable and not ready.
    ///
    /// Returns the number of attempts made.
    async fn run_step<A: ResourceAction>(
        &self,
        step: &Step<A>,
        action: &mut A,
    ) -> Result<u32, LifecycleError> {
        let first_attempt = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            tracing::debug!(step = step.name(), attempt, "Performing step");

            let err = match step.perform(action).await {
                Ok(()) => return Ok(attempt),
                Err(err) => err,
            };

            let (timeout, message) = match (err, step.timeout()) {
                (StepError::NotReady(message), Some(timeout)) => (timeout, message),
                (err, _) => {
                    tracing::warn!(step = step.name(), kind = %err.kind(), "Step failed: {}", err);
                    return Err(LifecycleError::from_step(step.name(), err));
                }
            };

            let elapsed = first_attempt.elapsed();
            if elapsed >= timeout {
                tracing::warn!(
                    step = step.name(),
                    attempts = attempt,
                    "Giving up after {:?}: {}",
                    timeout,
                    message
                );
                return Err(LifecycleError::Timeout {
                    step: step.name().to_string(),
                    timeout,
                    message,
                });
            }

            let delay = self
                .retry
                .delay_for_attempt(attempt - 1)
                .min(timeout - elapsed)
                .max(MIN_BACKOFF);
            tracing::debug!(step = step.name(), "{}; retrying in {:?}", message, delay);

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::warn!("Cancelled while waiting on step {}", step.name());
                    return Err(LifecycleError::Cancelled {
                        next_step: step.name().to_string(),
                    });
                }
                _ = sleep(delay) => {}
            }
        }
    }

    async fn save_checkpoint(
        &self,
        phase: Phase,
        next_step: Option<String>,
        info: &ResourceInfo,
        completed: &str,
    ) -> Result<(), LifecycleError> {
        let Some(store) = &self.checkpoints else {
            return Ok(());
        };
        let key = Checkpoint::key(info, phase);
        let checkpoint = Checkpoint::new(phase, next_step, info.clone());
        store
            .save(&key, &checkpoint)
            .await
            .map_err(|source| LifecycleError::Checkpoint {
                step: completed.to_string(),
                source,
            })
    }

    async fn clear_checkpoint(&self, phase: Phase, info: &ResourceInfo) {
        let Some(store) = &self.checkpoints else {
            return;
        };
        let key = Checkpoint::key(info, phase);
        // The chain already finished; a stale checkpoint only costs a replay
        // of idempotent steps.
        if let Err(e) = store.remove(&key).await {
            tracing::warn!("Failed to remove checkpoint {}: {}", key, e);
        }
    }
}
