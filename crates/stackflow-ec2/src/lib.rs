//! EC2-compatible compute resources for StackFlow
//!
//! Resource actions for the compute service, written against the
//! [`ComputeGateway`] trait so the same chains run against a real endpoint
//! or the in-memory [`SimulatedCompute`].
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud::{LifecycleExecutor, ResourceAction, ResourceInfo};
//! use stackflow_ec2::{SimulatedCompute, VolumeAction, VolumeProperties};
//!
//! let compute = Arc::new(SimulatedCompute::default().with_account_admin("user-1", "admin"));
//! let mut action = VolumeAction::new(properties, info, compute.clone(), compute);
//! let chain = action.create_chain()?;
//! let outcome = LifecycleExecutor::new().execute(&chain, &mut action, None).await?;
//! ```

pub mod error;
pub mod gateway;
pub mod simulated;
pub mod volume;

pub use error::{Ec2Error, Result};
pub use gateway::{
    AccountDirectory, ComputeGateway, CreateVolumeRequest, Principal, SnapshotInfo,
    SnapshotStatus, VolumeInfo, VolumeStatus,
};
pub use simulated::{Call, SimulatedCompute};
pub use volume::{
    SNAPSHOT_ID_FOR_DELETE, VOLUME_RESOURCE_TYPE, VolumeAction, VolumeProperties, VolumeTimeouts,
};
