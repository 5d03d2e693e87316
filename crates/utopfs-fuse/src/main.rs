//! utopfs daemon.
//!
//! Mounts a backing store at a directory, with a read-only `.utopfs`
//! control directory at its root, and serves it until interrupted.
//!
//! ```bash
//! # Ephemeral in-memory tree
//! utopfs /tmp/m
//!
//! # Serve a local directory, read-only
//! utopfs /tmp/m --store /srv/data --read-only
//!
//! # Probe from another shell
//! cat /tmp/m/.utopfs/version
//! ```
//!
//! Stop with Ctrl-C (or SIGTERM); the mount is detached before exit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use utopfs_fuse::{Config, FuseBridge, StoreKind};
use utopfs_kernel::MountManager;
use utopfs_kernel::mount::probe_mount_point;

/// Serve a utopfs namespace over FUSE.
#[derive(Parser, Debug)]
#[command(name = "utopfs")]
#[command(about = "Mount a utopfs namespace with a .utopfs control directory", version)]
struct Args {
    /// Directory to mount on
    mountpoint: PathBuf,

    /// Config file (default: ~/.config/utopfs/config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serve this local directory instead of the configured store
    #[arg(long, conflicts_with = "memory")]
    store: Option<PathBuf>,

    /// Serve an empty in-memory tree
    #[arg(long)]
    memory: bool,

    /// Reject every write to the real tree
    #[arg(long)]
    read_only: bool,

    /// Milliseconds unmount waits for in-flight requests
    #[arg(long)]
    drain_grace_ms: Option<u64>,

    /// Helper used to detach the kernel mount
    #[arg(long)]
    fusermount: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(root) = &self.store {
            config.store.kind = StoreKind::Local;
            config.store.root = Some(root.clone());
        }
        if self.memory {
            config.store.kind = StoreKind::Memory;
        }
        if self.read_only {
            config.store.read_only = true;
        }
        if let Some(ms) = self.drain_grace_ms {
            config.mount.drain_grace_ms = ms;
        }
        if let Some(fusermount) = &self.fusermount {
            config.fuse.fusermount = fusermount.clone();
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn shutdown_signal() -> Result<&'static str> {
    let mut term = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("wait for ctrl-c")?;
            Ok("SIGINT")
        }
        _ = term.recv() => Ok("SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::discover(args.config.as_deref())?;
    args.apply(&mut config);
    init_tracing(&config.log.filter);

    let store = config.backing_store()?;
    let bridge = FuseBridge::new(tokio::runtime::Handle::current(), config.fuse_options());
    let manager = MountManager::new(store, Arc::new(bridge), config.mount_options());

    let handle = manager
        .mount(&args.mountpoint)
        .await
        .with_context(|| format!("mount {}", args.mountpoint.display()))?;
    tracing::info!(
        point = %handle.point().display(),
        store = ?config.store.kind,
        read_only = config.store.read_only,
        "utopfs ready"
    );
    if !probe_mount_point(handle.point()).await {
        tracing::warn!(point = %handle.point().display(), "control directory not visible through the kernel yet");
    }

    let reason = shutdown_signal().await?;
    tracing::info!(reason, "shutting down");

    // A busy mount point is common right after a shell leaves it; retry briefly.
    let mut attempts = 0;
    loop {
        match manager.unmount(&handle).await {
            Ok(()) => break,
            Err(e) if e.is_retryable() && attempts < 3 => {
                attempts += 1;
                tracing::warn!(error = %e, attempts, "unmount failed, retrying");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Err(e) => return Err(e).context("unmount"),
        }
    }

    tracing::info!("utopfs stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "utopfs",
            "/tmp/m",
            "--store",
            "/srv/data",
            "--read-only",
            "--drain-grace-ms",
            "100",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.store.kind, StoreKind::Local);
        assert_eq!(config.store.root, Some(PathBuf::from("/srv/data")));
        assert!(config.store.read_only);
        assert_eq!(config.mount.drain_grace_ms, 100);
    }

    #[test]
    fn test_store_and_memory_conflict() {
        let result = Args::try_parse_from(["utopfs", "/tmp/m", "--store", "/srv", "--memory"]);
        assert!(result.is_err());
    }
}
