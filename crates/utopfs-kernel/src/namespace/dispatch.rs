//! Request dispatch across the control and real namespaces.
//!
//! Every operation is admitted against the mount state, classified once,
//! and routed:
//!
//! ```text
//! request ─ admit ─ classify ─┬─ Control ─ ControlProvider
//!                             └─ Real ──── BackingStore (errors pass through)
//! ```
//!
//! Mutations aimed at the control subtree fail with
//! [`FsError::ReadOnlyViolation`] before the backing store is touched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::mount::MountState;
use crate::vfs::{BackingStore, DirEntry, FileAttr, FsError, FsResult, OpenFlags, SetAttr, StatFs};

use super::classify::{PathClassification, RESERVED_NAME, classify, classify_listing};
use super::control::{ControlContext, ControlProvider};

/// Where a read-side request goes.
enum Route {
    Control(PathBuf, ControlContext),
    Real(PathBuf),
}

/// Routes filesystem operations for one mount.
///
/// Holds no mutable state of its own: the stats and lifecycle it consults
/// belong to the [`MountState`], so any number of kernel threads may call
/// in concurrently.
pub struct Dispatcher {
    backing: Arc<dyn BackingStore>,
    state: Arc<MountState>,
    control: ControlProvider,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("point", &self.state.point())
            .field("state", &self.state.state())
            .finish()
    }
}

impl Dispatcher {
    pub(crate) fn new(backing: Arc<dyn BackingStore>, state: Arc<MountState>) -> Self {
        Self {
            backing,
            state,
            control: ControlProvider,
        }
    }

    /// The mount this dispatcher serves.
    pub fn mount_state(&self) -> &Arc<MountState> {
        &self.state
    }

    /// Classify a read-side path. Control paths exist only once mounted.
    fn route(&self, path: &Path) -> FsResult<Route> {
        match classify(path) {
            PathClassification::Control(relative) => {
                if !self.state.is_mounted() {
                    return Err(FsError::not_found(
                        Path::new(RESERVED_NAME).join(&relative).display().to_string(),
                    ));
                }
                let ctx = ControlContext {
                    stats: self.state.stats().snapshot(),
                    mounted_at: self.state.mounted_at(),
                };
                Ok(Route::Control(relative, ctx))
            }
            PathClassification::Real(relative) => Ok(Route::Real(relative)),
            PathClassification::ReservedCollision(relative) => {
                Err(FsError::not_found(relative.display().to_string()))
            }
        }
    }

    /// Classify a mutation target. Anything under `.utopfs` is rejected.
    fn writable(&self, path: &Path) -> FsResult<PathBuf> {
        match classify(path) {
            PathClassification::Real(relative) => Ok(relative),
            other => {
                tracing::debug!(path = %path.display(), "rejecting mutation of control path");
                Err(FsError::read_only_violation(
                    Path::new(RESERVED_NAME).join(other.relative()).display().to_string(),
                ))
            }
        }
    }

    /// Root listing: backing entries, minus any shadowed `.utopfs`, plus the
    /// control directory once mounted.
    fn merge_root(&self, listing: Vec<DirEntry>) -> Vec<DirEntry> {
        let mut merged: Vec<DirEntry> = listing
            .into_iter()
            .filter(|entry| match classify_listing(Path::new(""), &entry.name) {
                PathClassification::ReservedCollision(_) => {
                    if self.state.note_collision() {
                        tracing::warn!(
                            point = %self.state.point().display(),
                            "backing store has a root entry named {RESERVED_NAME}; it is hidden by the control directory"
                        );
                    }
                    false
                }
                _ => true,
            })
            .collect();

        if self.state.is_mounted() {
            merged.push(DirEntry::directory(RESERVED_NAME));
        }
        merged.sort_by(|a, b| a.name.cmp(&b.name));
        merged
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Resolve a single path to its attributes.
    pub async fn lookup(&self, path: &Path) -> FsResult<FileAttr> {
        let guard = self.state.admit()?;
        tracing::trace!(path = %path.display(), "lookup");
        guard
            .run(async {
                match self.route(path)? {
                    Route::Control(rel, ctx) => self.control.getattr(&rel, &ctx),
                    Route::Real(rel) => self.backing.lookup(&rel).await.map(|entry| entry.attr),
                }
            })
            .await
    }

    /// Get attributes.
    pub async fn getattr(&self, path: &Path) -> FsResult<FileAttr> {
        let guard = self.state.admit()?;
        tracing::trace!(path = %path.display(), "getattr");
        guard
            .run(async {
                match self.route(path)? {
                    Route::Control(rel, ctx) => self.control.getattr(&rel, &ctx),
                    Route::Real(rel) => self.backing.stat(&rel).await,
                }
            })
            .await
    }

    /// List a directory.
    pub async fn readdir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        let guard = self.state.admit()?;
        tracing::trace!(path = %path.display(), "readdir");
        guard
            .run(async {
                match self.route(path)? {
                    Route::Control(rel, _) => self.control.readdir(&rel),
                    Route::Real(rel) if rel.as_os_str().is_empty() => {
                        let listing = self.backing.list(&rel).await?;
                        Ok(self.merge_root(listing))
                    }
                    Route::Real(rel) => self.backing.list(&rel).await,
                }
            })
            .await
    }

    /// Check that `path` may be opened with `flags`; returns its attributes.
    pub async fn open(&self, path: &Path, flags: OpenFlags) -> FsResult<FileAttr> {
        let guard = self.state.admit()?;
        tracing::trace!(path = %path.display(), ?flags, "open");
        guard
            .run(async {
                match self.route(path)? {
                    Route::Control(rel, ctx) => self.control.open(&rel, flags, &ctx),
                    Route::Real(rel) => {
                        let attr = self.backing.stat(&rel).await?;
                        if flags.mutates() && self.backing.read_only() {
                            return Err(FsError::ReadOnly);
                        }
                        Ok(attr)
                    }
                }
            })
            .await
    }

    /// Read up to `size` bytes at `offset`.
    pub async fn read(&self, path: &Path, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let guard = self.state.admit()?;
        tracing::trace!(path = %path.display(), offset, size, "read");
        let data = guard
            .run(async {
                match self.route(path)? {
                    Route::Control(rel, ctx) => self.control.read(&rel, offset, size, &ctx),
                    Route::Real(rel) => self.backing.read(&rel, offset, size).await,
                }
            })
            .await?;
        self.state.stats().record_read(data.len());
        Ok(data)
    }

    /// Read a symbolic link target.
    pub async fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        let guard = self.state.admit()?;
        guard
            .run(async {
                match self.route(path)? {
                    Route::Control(rel, ctx) => {
                        self.control.getattr(&rel, &ctx)?;
                        Err(FsError::NotASymlink(path.display().to_string()))
                    }
                    Route::Real(rel) => self.backing.readlink(&rel).await,
                }
            })
            .await
    }

    /// Filesystem statistics, from the backing store.
    pub async fn statfs(&self) -> FsResult<StatFs> {
        let guard = self.state.admit()?;
        guard.run(self.backing.statfs()).await
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write `data` at `offset`.
    pub async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> FsResult<u32> {
        let guard = self.state.admit()?;
        tracing::trace!(path = %path.display(), offset, len = data.len(), "write");
        let rel = self.writable(path)?;
        let written = guard.run(self.backing.write(&rel, offset, data)).await?;
        self.state.stats().record_write(written as usize);
        Ok(written)
    }

    /// Create an empty regular file.
    pub async fn create(&self, path: &Path, mode: u32) -> FsResult<FileAttr> {
        let guard = self.state.admit()?;
        let rel = self.writable(path)?;
        guard.run(self.backing.create(&rel, mode)).await
    }

    /// Create a directory.
    pub async fn mkdir(&self, path: &Path, mode: u32) -> FsResult<FileAttr> {
        let guard = self.state.admit()?;
        let rel = self.writable(path)?;
        guard.run(self.backing.mkdir(&rel, mode)).await
    }

    /// Remove a file.
    pub async fn unlink(&self, path: &Path) -> FsResult<()> {
        let guard = self.state.admit()?;
        let rel = self.writable(path)?;
        guard.run(self.backing.unlink(&rel)).await
    }

    /// Remove an empty directory.
    pub async fn rmdir(&self, path: &Path) -> FsResult<()> {
        let guard = self.state.admit()?;
        let rel = self.writable(path)?;
        guard.run(self.backing.rmdir(&rel)).await
    }

    /// Rename within the real tree. Either end in `.utopfs` is rejected.
    pub async fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        let guard = self.state.admit()?;
        let from = self.writable(from)?;
        let to = self.writable(to)?;
        guard.run(self.backing.rename(&from, &to)).await
    }

    /// Truncate a file.
    pub async fn truncate(&self, path: &Path, size: u64) -> FsResult<()> {
        let guard = self.state.admit()?;
        let rel = self.writable(path)?;
        guard.run(self.backing.truncate(&rel, size)).await
    }

    /// Set attributes.
    pub async fn setattr(&self, path: &Path, attr: SetAttr) -> FsResult<FileAttr> {
        let guard = self.state.admit()?;
        let rel = self.writable(path)?;
        guard.run(self.backing.setattr(&rel, attr)).await
    }

    /// Create a symbolic link at `path` pointing to `target`.
    pub async fn symlink(&self, path: &Path, target: &Path) -> FsResult<FileAttr> {
        let guard = self.state.admit()?;
        let rel = self.writable(path)?;
        guard.run(self.backing.symlink(&rel, target)).await
    }
}
