//! Mount lifecycle: per-point state machine, request admission and drain,
//! and the seam to the kernel transport.

mod bridge;
mod error;
mod manager;
mod state;

pub use bridge::{BridgeSession, DetachedBridge, KernelBridge};
pub use error::{MountError, UnmountError};
pub use manager::{
    DEFAULT_DRAIN_GRACE, MountHandle, MountInfo, MountManager, MountOptions, probe_mount_point,
};
pub use state::{LifecycleState, MountState, RequestGuard};
