//! Daemon configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file at all) is a valid configuration. CLI flags are applied on top by
//! the binary.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use utopfs_kernel::mount::{DEFAULT_DRAIN_GRACE, MountOptions};
use utopfs_kernel::{BackingStore, LocalBackend, MemoryBackend};

use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_ATTR_TTL, DEFAULT_FS_NAME, DEFAULT_FUSERMOUNT, DEFAULT_LOG_FILTER,
};
use crate::fuse::FuseOptions;

/// Config loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("store kind \"local\" requires store.root")]
    MissingStoreRoot,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub mount: MountSection,
    pub store: StoreSection,
    pub fuse: FuseSection,
    pub log: LogSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountSection {
    /// Milliseconds unmount waits for in-flight requests.
    pub drain_grace_ms: u64,
}

impl Default for MountSection {
    fn default() -> Self {
        Self {
            drain_grace_ms: DEFAULT_DRAIN_GRACE.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Local,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    pub kind: StoreKind,
    /// Root directory for `kind = "local"`.
    pub root: Option<PathBuf>,
    pub read_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FuseSection {
    pub fs_name: String,
    pub attr_ttl_ms: u64,
    pub fusermount: String,
    pub allow_other: bool,
}

impl Default for FuseSection {
    fn default() -> Self {
        Self {
            fs_name: DEFAULT_FS_NAME.to_string(),
            attr_ttl_ms: DEFAULT_ATTR_TTL.as_millis() as u64,
            fusermount: DEFAULT_FUSERMOUNT.to_string(),
            allow_other: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    pub filter: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    /// Parse a config from TOML text.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load a config file. Relative store roots resolve against the file's
    /// directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text, path)?;
        if let Some(root) = &mut config.store.root {
            if root.is_relative() {
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                *root = base.join(&*root);
            }
        }
        Ok(config)
    }

    /// Load `path` if given, else the user config file if it exists, else
    /// defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match default_path() {
                Some(path) if path.is_file() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn mount_options(&self) -> MountOptions {
        MountOptions {
            drain_grace: Duration::from_millis(self.mount.drain_grace_ms),
        }
    }

    pub fn fuse_options(&self) -> FuseOptions {
        FuseOptions {
            fs_name: self.fuse.fs_name.clone(),
            attr_ttl: Duration::from_millis(self.fuse.attr_ttl_ms),
            fusermount: self.fuse.fusermount.clone(),
            allow_other: self.fuse.allow_other,
            read_only: self.store.read_only,
        }
    }

    /// Build the configured backing store.
    pub fn backing_store(&self) -> Result<Arc<dyn BackingStore>, ConfigError> {
        match self.store.kind {
            StoreKind::Memory => Ok(Arc::new(MemoryBackend::new())),
            StoreKind::Local => {
                let root = self.store.root.as_ref().ok_or(ConfigError::MissingStoreRoot)?;
                if self.store.read_only {
                    Ok(Arc::new(LocalBackend::read_only(root)))
                } else {
                    Ok(Arc::new(LocalBackend::new(root)))
                }
            }
        }
    }
}

/// `$XDG_CONFIG_HOME/utopfs/config.toml` or the platform equivalent.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("utopfs").join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_all_defaults() {
        let config = Config::parse("", Path::new("inline")).unwrap();
        assert_eq!(config.mount.drain_grace_ms, 5000);
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.fuse.fs_name, "utopfs");
        assert_eq!(config.fuse.fusermount, "fusermount");
        assert_eq!(config.log.filter, "info");
        assert_eq!(config.mount_options().drain_grace, DEFAULT_DRAIN_GRACE);
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            [mount]
            drain_grace_ms = 250

            [store]
            kind = "local"
            root = "/srv/data"
            read_only = true

            [fuse]
            fs_name = "tank"
            attr_ttl_ms = 0
            fusermount = "fusermount3"

            [log]
            filter = "utopfs_kernel=debug"
        "#;
        let config = Config::parse(text, Path::new("inline")).unwrap();
        assert_eq!(config.mount_options().drain_grace, Duration::from_millis(250));
        assert_eq!(config.store.kind, StoreKind::Local);
        assert_eq!(config.store.root.as_deref(), Some(Path::new("/srv/data")));

        let fuse = config.fuse_options();
        assert_eq!(fuse.fs_name, "tank");
        assert_eq!(fuse.attr_ttl, Duration::ZERO);
        assert_eq!(fuse.fusermount, "fusermount3");
        assert!(fuse.read_only);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = Config::parse("[mount]\ngrace = 1\n", Path::new("inline")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = Config::parse("[store]\nkind = \"s3\"\n", Path::new("inline")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_local_store_needs_root() {
        let config = Config::parse("[store]\nkind = \"local\"\n", Path::new("inline")).unwrap();
        assert!(matches!(
            config.backing_store(),
            Err(ConfigError::MissingStoreRoot)
        ));
    }

    #[test]
    fn test_load_rebases_relative_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utopfs.toml");
        std::fs::write(&path, "[store]\nkind = \"local\"\nroot = \"data\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.store.root, Some(dir.path().join("data")));
        assert!(config.backing_store().is_ok());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = Config::load(Path::new("/nonexistent/utopfs.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
