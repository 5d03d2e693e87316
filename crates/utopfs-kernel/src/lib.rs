//! # utopfs-kernel
//!
//! Core of the utopfs mount: a real tree served from a backing store, with
//! a reserved `.utopfs` control directory at the root.
//!
//! - [`vfs`] - path-based filesystem types, errors and the backing store
//!   contract
//! - [`namespace`] - reserved-name classification, control files, dispatch
//! - [`mount`] - mount lifecycle, request admission and drain
//! - [`stats`] - per-mount operation counters

pub mod mount;
pub mod namespace;
pub mod stats;
pub mod vfs;

pub use mount::{
    DetachedBridge, KernelBridge, LifecycleState, MountError, MountHandle, MountManager,
    MountOptions, UnmountError,
};
pub use namespace::{Dispatcher, PathClassification, RESERVED_NAME, classify};
pub use stats::{FsStats, StatsSnapshot};
pub use vfs::{
    BackingStore, DirEntry, FileAttr, FileType, FsError, FsResult, LocalBackend, MemoryBackend,
    OpenFlags, SetAttr, StatFs,
};
