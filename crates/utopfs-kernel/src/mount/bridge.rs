//! Seam between the lifecycle manager and a kernel transport.
//!
//! The manager attaches a dispatcher once the backing store is ready and
//! detaches it after requests drain. The FUSE shim lives in another crate;
//! [`DetachedBridge`] serves everything in-process.

use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::namespace::Dispatcher;

/// Connects a dispatcher to the kernel at a mount point.
///
/// Both methods may block; the manager calls them off the async workers.
pub trait KernelBridge: Send + Sync {
    fn attach(&self, point: &Path, dispatcher: Arc<Dispatcher>)
    -> io::Result<Box<dyn BridgeSession>>;
}

/// A live kernel attachment.
pub trait BridgeSession: Send {
    /// Detach from the kernel. On error the session must still be usable,
    /// since the manager keeps the mount and may retry.
    fn detach(&mut self) -> io::Result<()>;
}

/// In-process bridge: no kernel mount, requests arrive through the
/// dispatcher directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedBridge;

struct DetachedSession;

impl KernelBridge for DetachedBridge {
    fn attach(
        &self,
        point: &Path,
        _dispatcher: Arc<Dispatcher>,
    ) -> io::Result<Box<dyn BridgeSession>> {
        tracing::debug!(point = %point.display(), "attached in-process");
        Ok(Box::new(DetachedSession))
    }
}

impl BridgeSession for DetachedSession {
    fn detach(&mut self) -> io::Result<()> {
        Ok(())
    }
}
