//! Per-mount operation counters.
//!
//! Counts reads and writes crossing the mount boundary (the upward
//! interface). Rendered by `.utopfs/stats`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by every request on one mount.
#[derive(Debug, Default)]
pub struct FsStats {
    rdops: AtomicU64,
    rdbytes: AtomicU64,
    wrops: AtomicU64,
    wrbytes: AtomicU64,
}

/// Point-in-time copy of [`FsStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub rdops: u64,
    pub rdbytes: u64,
    pub wrops: u64,
    pub wrbytes: u64,
}

impl FsStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed read of `bytes` bytes.
    pub fn record_read(&self, bytes: usize) {
        self.rdops.fetch_add(1, Ordering::Relaxed);
        self.rdbytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record one completed write of `bytes` bytes.
    pub fn record_write(&self, bytes: usize) {
        self.wrops.fetch_add(1, Ordering::Relaxed);
        self.wrbytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rdops: self.rdops.load(Ordering::Relaxed),
            rdbytes: self.rdbytes.load(Ordering::Relaxed),
            wrops: self.wrops.load(Ordering::Relaxed),
            wrbytes: self.wrbytes.load(Ordering::Relaxed),
        }
    }
}
