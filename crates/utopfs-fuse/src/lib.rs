//! # utopfs-fuse
//!
//! Kernel transport and daemon plumbing for utopfs: the `fuser` bridge,
//! inode bookkeeping, and the TOML configuration the `utopfs` binary reads.

pub mod config;
pub mod constants;
pub mod fuse;
pub mod inode;

pub use config::{Config, ConfigError, StoreKind};
pub use fuse::{FuseBridge, FuseOptions, UtopFuse};
