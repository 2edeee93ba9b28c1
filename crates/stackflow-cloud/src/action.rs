//! Resource actions and chain outcomes

use crate::error::Result;
use crate::state::{Phase, ResourceInfo};
use crate::step::StepChain;
use serde::{Deserialize, Serialize};

/// Lifecycle controller for one resource instance
///
/// Implementors bundle the desired-state properties, the observed
/// [`ResourceInfo`], and the create/delete step chains for their type.
pub trait ResourceAction: Send + Sized + 'static {
    /// Resource type (e.g., "AWS::EC2::Volume")
    fn resource_type(&self) -> &str;

    fn info(&self) -> &ResourceInfo;

    fn info_mut(&mut self) -> &mut ResourceInfo;

    fn create_chain(&self) -> Result<StepChain<Self>>;

    fn delete_chain(&self) -> Result<StepChain<Self>>;

    fn chain(&self, phase: Phase) -> Result<StepChain<Self>> {
        match phase {
            Phase::Create => self.create_chain(),
            Phase::Delete => self.delete_chain(),
        }
    }

    /// Replace the observed state, e.g. from a checkpoint
    fn restore(&mut self, info: ResourceInfo) {
        *self.info_mut() = info;
    }
}

/// Result of a chain that ran to completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainOutcome {
    pub resource_type: String,

    pub phase: Phase,

    /// Steps run by this invocation, in order
    pub completed_steps: Vec<String>,

    /// Final observed state
    pub info: ResourceInfo,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ChainOutcome {
    pub fn physical_resource_id(&self) -> Option<&str> {
        self.info.physical_resource_id.as_deref()
    }

    pub fn reference_value_json(&self) -> Option<&str> {
        self.info.reference_value_json.as_deref()
    }
}

impl std::fmt::Display for ChainOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}: {} steps in {}ms",
            self.resource_type,
            self.info.logical_resource_id,
            self.phase,
            self.completed_steps.len(),
            self.duration_ms
        )
    }
}
