//! Daemon defaults.
//!
//! Every value here can be overridden by the config file or the CLI.

use std::time::Duration;

/// Filesystem name reported to the kernel (shows up in `mount` output).
pub const DEFAULT_FS_NAME: &str = "utopfs";

/// How long the kernel may cache attributes and entries.
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(1);

/// Helper used to detach the kernel mount.
pub const DEFAULT_FUSERMOUNT: &str = "fusermount";

/// Log filter when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Config file name under the user's config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Inode number of the mount root.
pub const ROOT_INO: u64 = fuser::FUSE_ROOT_ID;
