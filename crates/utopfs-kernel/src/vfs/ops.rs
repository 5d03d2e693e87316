//! Backing store contract.
//!
//! The storage engine behind real files is an external collaborator. The
//! namespace layer reaches it only through [`BackingStore`], path-based with
//! explicit offset/size so no handle state crosses the boundary.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::types::{DirEntry, FileAttr, SetAttr, StatFs};
use super::{FsError, FsResult};

/// Metadata for a real path, as returned by [`BackingStore::lookup`].
///
/// Opaque to the namespace layer beyond the attributes it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct BackingEntry {
    /// Path relative to the store root.
    pub path: PathBuf,
    /// Attributes reported by the store.
    pub attr: FileAttr,
}

/// Storage engine behind the real tree.
///
/// Paths are always relative to the store's root; an empty path is the
/// root itself. Only the read side is required. Mutating operations default
/// to [`FsError::ReadOnly`] so a read-only engine implements four methods.
///
/// Failures are opaque to callers above: the dispatcher forwards whatever
/// error a store returns without reinterpreting it.
#[async_trait]
pub trait BackingStore: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get file attributes.
    async fn stat(&self, path: &Path) -> FsResult<FileAttr>;

    /// List directory entries, ordered by name.
    async fn list(&self, path: &Path) -> FsResult<Vec<DirEntry>>;

    /// Read up to `size` bytes starting at `offset`.
    ///
    /// Returns fewer bytes if EOF is reached.
    async fn read(&self, path: &Path, offset: u64, size: u32) -> FsResult<Vec<u8>>;

    /// Resolve a path to an entry.
    async fn lookup(&self, path: &Path) -> FsResult<BackingEntry> {
        let attr = self.stat(path).await?;
        Ok(BackingEntry {
            path: path.to_path_buf(),
            attr,
        })
    }

    /// Read symbolic link target.
    async fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        Err(FsError::NotASymlink(path.display().to_string()))
    }

    /// Confirm the store is reachable and initialized.
    ///
    /// Called once while a mount is in `Mounting`; an error aborts the mount.
    async fn probe(&self) -> FsResult<()> {
        let root = self.stat(Path::new("")).await?;
        if root.is_dir() {
            Ok(())
        } else {
            Err(FsError::not_a_directory("<store root>"))
        }
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write `data` at `offset`, returning the number of bytes written.
    async fn write(&self, _path: &Path, _offset: u64, _data: &[u8]) -> FsResult<u32> {
        Err(FsError::ReadOnly)
    }

    /// Create a new, empty regular file.
    async fn create(&self, _path: &Path, _mode: u32) -> FsResult<FileAttr> {
        Err(FsError::ReadOnly)
    }

    /// Create a new directory.
    async fn mkdir(&self, _path: &Path, _mode: u32) -> FsResult<FileAttr> {
        Err(FsError::ReadOnly)
    }

    /// Remove a file.
    async fn unlink(&self, _path: &Path) -> FsResult<()> {
        Err(FsError::ReadOnly)
    }

    /// Remove an empty directory.
    async fn rmdir(&self, _path: &Path) -> FsResult<()> {
        Err(FsError::ReadOnly)
    }

    /// Rename a file or directory.
    async fn rename(&self, _from: &Path, _to: &Path) -> FsResult<()> {
        Err(FsError::ReadOnly)
    }

    /// Truncate a file to the specified size.
    async fn truncate(&self, _path: &Path, _size: u64) -> FsResult<()> {
        Err(FsError::ReadOnly)
    }

    /// Set file attributes.
    async fn setattr(&self, _path: &Path, _attr: SetAttr) -> FsResult<FileAttr> {
        Err(FsError::ReadOnly)
    }

    /// Create a symbolic link at `path` pointing to `target`.
    async fn symlink(&self, _path: &Path, _target: &Path) -> FsResult<FileAttr> {
        Err(FsError::ReadOnly)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Returns true if this store rejects every mutation.
    fn read_only(&self) -> bool {
        true
    }

    /// Get filesystem statistics.
    async fn statfs(&self) -> FsResult<StatFs> {
        Ok(StatFs::default())
    }
}
