//! Compute provider error types

use stackflow_cloud::StepError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Ec2Error {
    #[error("Compute request failed: {0}")]
    Transport(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("No account found for user {0}")]
    AccountNotFound(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Cloud error: {0}")]
    CloudError(#[from] stackflow_cloud::CloudError),
}

impl Ec2Error {
    /// Provider-side message without the variant prefix
    pub fn upstream_message(&self) -> String {
        match self {
            Ec2Error::Transport(m) | Ec2Error::InvalidParameter(m) => m.clone(),
            other => other.to_string(),
        }
    }
}

// Rejected parameters are the caller's fault; anything else fails closed.
impl From<Ec2Error> for StepError {
    fn from(err: Ec2Error) -> Self {
        match err {
            Ec2Error::InvalidParameter(m) => StepError::Validation(m),
            other => StepError::Fatal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Ec2Error>;
