//! Path-based filesystem primitives shared by the namespace layer and the
//! backing stores.
//!
//! - [`BackingStore`] - contract to the storage engine behind real files
//! - [`FsError`] - error type forwarded unchanged across layers
//! - [`MemoryBackend`], [`LocalBackend`] - reference stores
//!
//! Operations use paths relative to the mount root, never inodes, and take
//! explicit offset/size so no open-file state is needed below the FUSE shim.

pub mod backends;
mod error;
mod ops;
mod types;

pub use backends::{LocalBackend, MemoryBackend};
pub use error::{FsError, FsResult};
pub use ops::{BackingEntry, BackingStore};
pub use types::{DirEntry, FileAttr, FileType, OpenFlags, SetAttr, StatFs};
