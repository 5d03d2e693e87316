//! Mount registry and lifecycle transitions.
//!
//! One slot per canonical mount point. The registry's entry API picks the
//! single winner among concurrent `mount` calls; each slot's session mutex
//! serializes that point's transitions. Lifecycle reads stay lock-free.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

use super::bridge::{BridgeSession, KernelBridge};
use super::error::{MountError, UnmountError};
use super::state::{LifecycleState, MountState};
use crate::namespace::{Dispatcher, RESERVED_NAME, pin_process_start};
use crate::vfs::BackingStore;

/// Default time in-flight requests get to finish before they are cancelled.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Tunables for [`MountManager`].
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// How long unmount waits for in-flight requests before cancelling them.
    pub drain_grace: Duration,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

/// One active mount.
///
/// Cheap to clone. Liveness ends once unmount completes; a stale handle
/// passed to [`MountManager::unmount`] is a no-op.
#[derive(Debug, Clone)]
pub struct MountHandle {
    state: Arc<MountState>,
    dispatcher: Arc<Dispatcher>,
}

impl MountHandle {
    /// Canonical mount point.
    pub fn point(&self) -> &Path {
        self.state.point()
    }

    /// When the mount began.
    pub fn mounted_at(&self) -> SystemTime {
        self.state.mounted_at()
    }

    /// True until unmount completes.
    pub fn is_live(&self) -> bool {
        self.state.state() != LifecycleState::Unmounted
    }

    pub fn state(&self) -> LifecycleState {
        self.state.state()
    }

    /// In-process entry point for filesystem requests on this mount.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

/// Snapshot of one registered mount.
#[derive(Debug, Clone)]
pub struct MountInfo {
    pub point: PathBuf,
    pub state: LifecycleState,
    pub mounted_at: SystemTime,
    pub inflight: usize,
}

struct MountSlot {
    state: Arc<MountState>,
    dispatcher: Arc<Dispatcher>,
    /// Held for the whole of a transition.
    session: Mutex<Option<Box<dyn BridgeSession>>>,
}

impl MountSlot {
    fn handle(&self) -> MountHandle {
        MountHandle {
            state: Arc::clone(&self.state),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

/// Owns every mount served by this process.
pub struct MountManager {
    backing: Arc<dyn BackingStore>,
    bridge: Arc<dyn KernelBridge>,
    options: MountOptions,
    slots: DashMap<PathBuf, Arc<MountSlot>>,
}

impl std::fmt::Debug for MountManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountManager")
            .field("options", &self.options)
            .field("mounts", &self.slots.len())
            .finish()
    }
}

impl MountManager {
    pub fn new(
        backing: Arc<dyn BackingStore>,
        bridge: Arc<dyn KernelBridge>,
        options: MountOptions,
    ) -> Self {
        pin_process_start();
        Self {
            backing,
            bridge,
            options,
            slots: DashMap::new(),
        }
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    /// Mount the namespace at `point`.
    ///
    /// On any failure the point is left unmounted and nothing is retried.
    pub async fn mount(&self, point: impl AsRef<Path>) -> Result<MountHandle, MountError> {
        let point = validate_mount_point(point.as_ref()).await?;

        let state = Arc::new(MountState::new(point.clone()));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&self.backing), Arc::clone(&state)));
        let slot = Arc::new(MountSlot {
            state,
            dispatcher,
            session: Mutex::new(None),
        });

        // Locked before the slot is published so no unmount can interleave
        // with Mounting.
        let mut session = slot.session.lock().await;
        match self.slots.entry(point.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(point = %point.display(), "mount lost race, already mounted");
                return Err(MountError::AlreadyMounted(point));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&slot));
            }
        }
        tracing::info!(point = %point.display(), "mounting");

        if let Err(e) = self.backing.probe().await {
            tracing::warn!(point = %point.display(), error = %e, "backing store probe failed");
            self.abort(&slot);
            return Err(MountError::BackingStoreUnreachable(e));
        }

        let bridge = Arc::clone(&self.bridge);
        let attach_point = point.clone();
        let attach_dispatcher = Arc::clone(&slot.dispatcher);
        let attached = tokio::task::spawn_blocking(move || {
            bridge.attach(&attach_point, attach_dispatcher)
        })
        .await
        .unwrap_or_else(|join| Err(io::Error::other(join)));

        match attached {
            Ok(bridge_session) => {
                *session = Some(bridge_session);
                slot.state.set_state(LifecycleState::Mounted);
                tracing::info!(point = %point.display(), "mounted");
                Ok(slot.handle())
            }
            Err(e) => {
                tracing::warn!(point = %point.display(), error = %e, "kernel bridge attach failed");
                self.abort(&slot);
                Err(MountError::Bridge(e))
            }
        }
    }

    fn abort(&self, slot: &Arc<MountSlot>) {
        slot.state.set_state(LifecycleState::Unmounted);
        self.slots
            .remove_if(slot.state.point(), |_, current| Arc::ptr_eq(current, slot));
    }

    /// Unmount the mount `handle` refers to.
    ///
    /// Succeeds immediately if that mount is already gone.
    pub async fn unmount(&self, handle: &MountHandle) -> Result<(), UnmountError> {
        let Some(slot) = self.slot(handle.point()) else {
            return Ok(());
        };
        if !Arc::ptr_eq(&slot.state, &handle.state) {
            tracing::debug!(point = %handle.point().display(), "stale handle, nothing to unmount");
            return Ok(());
        }
        self.unmount_slot(&slot).await
    }

    /// Unmount whatever is mounted at `point`. No-op if nothing is.
    pub async fn unmount_point(&self, point: impl AsRef<Path>) -> Result<(), UnmountError> {
        let point = canonical_or_given(point.as_ref());
        match self.slot(&point) {
            Some(slot) => self.unmount_slot(&slot).await,
            None => Ok(()),
        }
    }

    /// Unmount everything, returning the failures.
    pub async fn unmount_all(&self) -> Vec<UnmountError> {
        let slots: Vec<Arc<MountSlot>> =
            self.slots.iter().map(|entry| Arc::clone(entry.value())).collect();
        let mut errors = Vec::new();
        for slot in slots {
            if let Err(e) = self.unmount_slot(&slot).await {
                errors.push(e);
            }
        }
        errors
    }

    async fn unmount_slot(&self, slot: &Arc<MountSlot>) -> Result<(), UnmountError> {
        let mut session = slot.session.lock().await;
        let point = slot.state.point().to_path_buf();
        if slot.state.state() != LifecycleState::Mounted {
            return Ok(());
        }

        tracing::info!(point = %point.display(), inflight = slot.state.inflight(), "unmounting");
        slot.state.set_state(LifecycleState::Unmounting);
        if !slot.state.drain(self.options.drain_grace).await {
            tracing::warn!(point = %point.display(), "in-flight requests were cancelled");
        }

        let result = match session.take() {
            Some(mut bridge_session) => {
                match tokio::task::spawn_blocking(move || {
                    let result = bridge_session.detach();
                    (bridge_session, result)
                })
                .await
                {
                    Ok((bridge_session, Err(source))) => Err((Some(bridge_session), source)),
                    Ok((_, Ok(()))) => Ok(()),
                    Err(join) => Err((None, io::Error::other(join))),
                }
            }
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                self.release(slot, &point);
                tracing::info!(point = %point.display(), "unmounted");
                Ok(())
            }
            Err((Some(kept), source)) => {
                *session = Some(kept);
                slot.state.reset_cancel();
                slot.state.set_state(LifecycleState::Mounted);
                tracing::warn!(point = %point.display(), error = %source, "detach failed, still mounted");
                Err(UnmountError::Busy {
                    path: point,
                    source,
                })
            }
            Err((None, source)) => {
                // The session went down with the task; nothing left to retry with.
                self.release(slot, &point);
                tracing::error!(point = %point.display(), error = %source, "detach task aborted");
                Err(UnmountError::SessionLost {
                    path: point,
                    source,
                })
            }
        }
    }

    fn release(&self, slot: &Arc<MountSlot>, point: &Path) {
        slot.state.set_state(LifecycleState::Unmounted);
        self.slots.remove_if(point, |_, current| Arc::ptr_eq(current, slot));
    }

    fn slot(&self, point: &Path) -> Option<Arc<MountSlot>> {
        self.slots.get(point).map(|entry| Arc::clone(entry.value()))
    }

    /// Handle for the live mount at `point`, if any.
    pub fn handle(&self, point: impl AsRef<Path>) -> Option<MountHandle> {
        self.slot(&canonical_or_given(point.as_ref()))
            .map(|slot| slot.handle())
    }

    /// Lifecycle state of `point`; `Unmounted` if nothing is registered.
    pub fn state(&self, point: impl AsRef<Path>) -> LifecycleState {
        self.slot(&canonical_or_given(point.as_ref()))
            .map(|slot| slot.state.state())
            .unwrap_or(LifecycleState::Unmounted)
    }

    /// Liveness probe: the point exists and its root listing, as served by
    /// this process, contains `.utopfs`.
    pub async fn is_mounted(&self, point: impl AsRef<Path>) -> bool {
        let point = point.as_ref();
        if !tokio::fs::try_exists(point).await.unwrap_or(false) {
            return false;
        }
        let Some(slot) = self.slot(&canonical_or_given(point)) else {
            return false;
        };
        match slot.dispatcher.readdir(Path::new("")).await {
            Ok(entries) => entries.iter().any(|e| e.name == RESERVED_NAME),
            Err(_) => false,
        }
    }

    /// Every registered mount, ordered by point.
    pub fn list_mounts(&self) -> Vec<MountInfo> {
        let mut mounts: Vec<MountInfo> = self
            .slots
            .iter()
            .map(|entry| {
                let state = &entry.value().state;
                MountInfo {
                    point: entry.key().clone(),
                    state: state.state(),
                    mounted_at: state.mounted_at(),
                    inflight: state.inflight(),
                }
            })
            .collect();
        mounts.sort_by(|a, b| a.point.cmp(&b.point));
        mounts
    }
}

/// Liveness probe against the host filesystem, for kernel-backed mounts.
pub async fn probe_mount_point(point: impl AsRef<Path>) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(point.as_ref()).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name() == RESERVED_NAME {
            return true;
        }
    }
    false
}

fn canonical_or_given(point: &Path) -> PathBuf {
    dunce::canonicalize(point).unwrap_or_else(|_| point.to_path_buf())
}

async fn validate_mount_point(point: &Path) -> Result<PathBuf, MountError> {
    let invalid = |reason: String| MountError::MountPointInvalid {
        path: point.to_path_buf(),
        reason,
    };
    let canonical = dunce::canonicalize(point).map_err(|e| invalid(e.to_string()))?;
    let meta = tokio::fs::metadata(&canonical)
        .await
        .map_err(|e| invalid(e.to_string()))?;
    if !meta.is_dir() {
        return Err(invalid("not a directory".into()));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::DetachedBridge;
    use crate::vfs::MemoryBackend;

    fn manager() -> MountManager {
        MountManager::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(DetachedBridge),
            MountOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_mount_point_must_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();

        let mgr = manager();
        assert!(matches!(
            mgr.mount(&file).await,
            Err(MountError::MountPointInvalid { .. })
        ));
        assert!(matches!(
            mgr.mount(dir.path().join("missing")).await,
            Err(MountError::MountPointInvalid { .. })
        ));
        assert!(mgr.list_mounts().is_empty());
    }

    #[tokio::test]
    async fn test_points_are_canonicalized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("m")).unwrap();
        let mgr = manager();

        let handle = mgr.mount(dir.path().join("m")).await.unwrap();
        let dotted = dir.path().join("m").join("..").join("m");
        assert!(matches!(
            mgr.mount(&dotted).await,
            Err(MountError::AlreadyMounted(_))
        ));
        assert_eq!(mgr.state(&dotted), LifecycleState::Mounted);

        mgr.unmount(&handle).await.unwrap();
        assert!(!handle.is_live());
    }

    #[tokio::test]
    async fn test_stale_handle_unmount_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager();

        let first = mgr.mount(dir.path()).await.unwrap();
        mgr.unmount(&first).await.unwrap();
        let second = mgr.mount(dir.path()).await.unwrap();

        mgr.unmount(&first).await.unwrap();
        assert!(second.is_live());
        assert!(mgr.is_mounted(dir.path()).await);

        mgr.unmount_point(dir.path()).await.unwrap();
        assert!(!second.is_live());
    }

    #[tokio::test]
    async fn test_list_and_unmount_all() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let mgr = manager();
        mgr.mount(a.path()).await.unwrap();
        mgr.mount(b.path()).await.unwrap();

        let mounts = mgr.list_mounts();
        assert_eq!(mounts.len(), 2);
        assert!(mounts.iter().all(|m| m.state == LifecycleState::Mounted));

        assert!(mgr.unmount_all().await.is_empty());
        assert!(mgr.list_mounts().is_empty());
    }

    #[tokio::test]
    async fn test_probe_mount_point_on_plain_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!probe_mount_point(dir.path()).await);
        std::fs::create_dir(dir.path().join(RESERVED_NAME)).unwrap();
        assert!(probe_mount_point(dir.path()).await);
        assert!(!probe_mount_point(dir.path().join("missing")).await);
    }
}
