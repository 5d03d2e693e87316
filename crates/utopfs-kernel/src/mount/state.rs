//! Per-mount lifecycle state and request admission.

use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::stats::FsStats;
use crate::vfs::{FsError, FsResult};

/// Where a mount is in its lifecycle.
///
/// `Unmounted → Mounting → Mounted → Unmounting → Unmounted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Unmounted = 0,
    Mounting = 1,
    Mounted = 2,
    Unmounting = 3,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LifecycleState::Mounting,
            2 => LifecycleState::Mounted,
            3 => LifecycleState::Unmounting,
            _ => LifecycleState::Unmounted,
        }
    }

    /// The kernel may talk to us while mounting, so both phases admit.
    pub fn admits_requests(self) -> bool {
        matches!(self, LifecycleState::Mounting | LifecycleState::Mounted)
    }
}

/// State shared by a mount's dispatcher, handle and manager.
///
/// The lifecycle word is read lock-free; writes happen only under the
/// manager's per-mount transition lock.
#[derive(Debug)]
pub struct MountState {
    point: PathBuf,
    mounted_at: SystemTime,
    state: AtomicU8,
    inflight: AtomicUsize,
    idle: Notify,
    cancel: Mutex<CancellationToken>,
    stats: FsStats,
    collision_reported: AtomicBool,
}

impl MountState {
    pub(crate) fn new(point: PathBuf) -> Self {
        Self {
            point,
            mounted_at: SystemTime::now(),
            state: AtomicU8::new(LifecycleState::Mounting as u8),
            inflight: AtomicUsize::new(0),
            idle: Notify::new(),
            cancel: Mutex::new(CancellationToken::new()),
            stats: FsStats::new(),
            collision_reported: AtomicBool::new(false),
        }
    }

    /// Canonical mount point.
    pub fn point(&self) -> &Path {
        &self.point
    }

    /// When the mount began.
    pub fn mounted_at(&self) -> SystemTime {
        self.mounted_at
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// True only once initialization has fully completed.
    pub fn is_mounted(&self) -> bool {
        self.state() == LifecycleState::Mounted
    }

    pub(crate) fn set_state(&self, next: LifecycleState) {
        let prev = LifecycleState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        tracing::debug!(point = %self.point.display(), ?prev, ?next, "mount state transition");
    }

    pub fn stats(&self) -> &FsStats {
        &self.stats
    }

    /// Requests currently holding an admission guard.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    /// Admit one request, or refuse with [`FsError::NotMounted`].
    ///
    /// The counter is bumped before the state check so a concurrent
    /// unmount either sees this request in flight or this request sees
    /// `Unmounting`.
    pub fn admit(self: &Arc<Self>) -> FsResult<RequestGuard> {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        let guard = RequestGuard {
            state: Arc::clone(self),
            cancel: self.cancel.lock().clone(),
        };
        if self.state().admits_requests() {
            Ok(guard)
        } else {
            Err(FsError::NotMounted)
        }
    }

    /// Returns true the first time a reserved-name collision is seen.
    pub(crate) fn note_collision(&self) -> bool {
        !self.collision_reported.swap(true, Ordering::Relaxed)
    }

    async fn wait_idle(&self) {
        loop {
            // Created before the check so a release in between still wakes us.
            let notified = self.idle.notified();
            if self.inflight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait for in-flight requests to finish.
    ///
    /// After `grace`, remaining requests are cancelled and awaited. Returns
    /// false if cancellation was needed.
    pub(crate) async fn drain(&self, grace: Duration) -> bool {
        if tokio::time::timeout(grace, self.wait_idle()).await.is_ok() {
            return true;
        }
        tracing::warn!(
            point = %self.point.display(),
            inflight = self.inflight(),
            "drain grace expired, cancelling in-flight requests"
        );
        self.cancel.lock().cancel();
        self.wait_idle().await;
        false
    }

    /// Arm a fresh cancellation token after an aborted unmount.
    pub(crate) fn reset_cancel(&self) {
        let mut cancel = self.cancel.lock();
        if cancel.is_cancelled() {
            *cancel = CancellationToken::new();
        }
    }
}

/// Proof of admission for one request. Releases the slot on drop.
#[derive(Debug)]
pub struct RequestGuard {
    state: Arc<MountState>,
    cancel: CancellationToken,
}

impl RequestGuard {
    /// Drive `fut` unless the mount cancels it first.
    pub async fn run<T, F>(&self, fut: F) -> FsResult<T>
    where
        F: Future<Output = FsResult<T>>,
    {
        tokio::select! {
            biased;
            result = fut => result,
            _ = self.cancel.cancelled() => Err(FsError::Cancelled),
        }
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if self.state.inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.idle.notify_waiters();
        }
    }
}
