//! StackFlow resource lifecycle engine
//!
//! This crate decomposes the creation or deletion of a single cloud
//! resource into an ordered chain of idempotent, individually retryable
//! steps, and drives that chain to one coherent outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              LifecycleScheduler                  │
//! │      (spawn / resume / cancel per resource)      │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │              LifecycleExecutor                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  StepChain<A>: [Step, Step, Step, ...]   │   │
//! │  │  retry-until-timeout, abort on fatal     │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ ResourceInfo │  │ Checkpoints  │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────────────────────────────┘
//!         │ Step::perform(&mut A)
//! ┌───────▼───────┐
//! │ ResourceAction│ ──▶ provider gateway (stackflow-ec2, ...)
//! └───────────────┘
//! ```

pub mod action;
pub mod error;
pub mod executor;
pub mod launcher;
pub mod pagination;
pub mod scheduler;
pub mod state;
pub mod step;
pub mod tags;

// Re-exports
pub use action::{ChainOutcome, ResourceAction};
pub use error::{CloudError, ErrorKind, LauncherError, LifecycleError, Result, StepError};
pub use executor::{LifecycleExecutor, RetryConfig};
pub use launcher::{
    CertificateStore, LauncherGuard, LauncherRegistry, LauncherSettings, LauncherState,
    ServerCertificate, StackControl, WorkerLauncher,
};
pub use pagination::{DEFAULT_MAX_PAGES, Page, collect_pages, find_in_pages};
pub use scheduler::{LifecycleHandle, LifecycleRequest, LifecycleScheduler};
pub use state::{
    Checkpoint, CheckpointStore, DeletionPolicy, FileCheckpointStore, MemoryCheckpointStore,
    Phase, ResourceInfo, StackRef,
};
pub use step::{Step, StepChain, StepFn, StepFuture};
pub use tags::Tag;
