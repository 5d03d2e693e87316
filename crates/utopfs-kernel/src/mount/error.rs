//! Mount and unmount errors.
//!
//! Each is terminal to the call that returned it; nothing here retries.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::vfs::FsError;

/// Why a mount attempt failed. The mount point is left unmounted.
#[derive(Debug, Error)]
pub enum MountError {
    /// A live mount already serves this point.
    #[error("already mounted: {}", .0.display())]
    AlreadyMounted(PathBuf),

    /// The mount point is missing or not a directory.
    #[error("invalid mount point {}: {reason}", path.display())]
    MountPointInvalid { path: PathBuf, reason: String },

    /// The backing store failed its reachability probe.
    #[error("backing store unreachable: {0}")]
    BackingStoreUnreachable(#[source] FsError),

    /// The kernel bridge could not attach.
    #[error("kernel bridge attach failed: {0}")]
    Bridge(#[source] io::Error),
}

/// Why an unmount failed.
#[derive(Debug, Error)]
pub enum UnmountError {
    /// The kernel refused to detach (typically EBUSY). The mount stays
    /// `Mounted` and may be retried.
    #[error("mount point busy: {}", path.display())]
    Busy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The detach task died before reporting back. The mount is released
    /// here; the kernel side may still need `fusermount -u`.
    #[error("detach aborted, kernel mount state unknown: {}", path.display())]
    SessionLost {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl UnmountError {
    /// True if calling unmount again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UnmountError::Busy { .. })
    }
}
