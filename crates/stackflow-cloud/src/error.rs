//! Error types for the lifecycle engine
//!
//! Three layers:
//! - [`CloudError`]: infrastructure failures (checkpoint I/O, pagination, transport)
//! - [`StepError`]: the classified outcome of a single step attempt
//! - [`LifecycleError`]: the terminal outcome of a whole step chain
//!
//! [`LauncherError`] covers the worker launcher.

use std::time::Duration;
use thiserror::Error;

/// Infrastructure errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Provider request failed: {0}")]
    Transport(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("Pagination stopped after {max_pages} pages without reaching the last page")]
    PageLimitExceeded { max_pages: usize },

    #[error("Truncated page returned without a continuation marker")]
    MissingMarker,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Worker launcher errors
#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("Launcher {0} is busy with another transition")]
    Busy(String),

    #[error("Worker stack {0} is active or still shutting down")]
    AlreadyEnabled(String),

    #[error("No worker image configured; set launcher.image before enabling")]
    ImageNotConfigured,

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),
}

/// Failure classification consumed by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input or a rejected precondition. Never retried.
    Validation,
    /// Desired state not reached yet. Retried until the step timeout.
    NotReady,
    /// Irrecoverable provider failure. Never retried.
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::NotReady => write!(f, "not-ready"),
            ErrorKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// Outcome of a failed step attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotReady(String),

    #[error("{0}")]
    Fatal(String),
}

impl StepError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Validation(_) => ErrorKind::Validation,
            StepError::NotReady(_) => ErrorKind::NotReady,
            StepError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StepError::Validation(m) | StepError::NotReady(m) | StepError::Fatal(m) => m,
        }
    }
}

// Unclassified failures fail closed.
impl From<CloudError> for StepError {
    fn from(err: CloudError) -> Self {
        StepError::Fatal(err.to_string())
    }
}

/// Terminal outcome of a step chain
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("{message}")]
    Validation { step: String, message: String },

    #[error("{message}")]
    Fatal { step: String, message: String },

    #[error("{message} (step {step} gave up after {timeout:?})")]
    Timeout {
        step: String,
        timeout: Duration,
        message: String,
    },

    #[error("Lifecycle cancelled before step {next_step}")]
    Cancelled { next_step: String },

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Invalid step chain: {0}")]
    InvalidChain(#[source] CloudError),

    #[error("Lifecycle task aborted: {0}")]
    Aborted(String),

    #[error("Checkpoint failed after step {step}: {source}")]
    Checkpoint {
        step: String,
        #[source]
        source: CloudError,
    },
}

impl LifecycleError {
    /// Build the terminal error for a step failure that will not be retried
    pub(crate) fn from_step(step: &str, err: StepError) -> Self {
        match err {
            StepError::Validation(message) => LifecycleError::Validation {
                step: step.to_string(),
                message,
            },
            // A one-shot step is never polled; not-ready is final there.
            StepError::NotReady(message) | StepError::Fatal(message) => LifecycleError::Fatal {
                step: step.to_string(),
                message,
            },
        }
    }

    /// Classification used for diagnostic routing
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Validation { .. }
            | LifecycleError::UnknownStep(_)
            | LifecycleError::InvalidChain(_) => ErrorKind::Validation,
            _ => ErrorKind::Fatal,
        }
    }

    /// The step the chain stopped at, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            LifecycleError::Validation { step, .. }
            | LifecycleError::Fatal { step, .. }
            | LifecycleError::Timeout { step, .. }
            | LifecycleError::Checkpoint { step, .. } => Some(step),
            LifecycleError::Cancelled { next_step } => Some(next_step),
            LifecycleError::UnknownStep(_)
            | LifecycleError::InvalidChain(_)
            | LifecycleError::Aborted(_) => None,
        }
    }
}
