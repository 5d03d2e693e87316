//! Synthetic files under `.utopfs`.
//!
//! The control subtree is a closed set: one read-only directory holding the
//! entries in [`CONTROL_ENTRIES`]. Content is generated on every read.
//! Anything not in the table is `NotFound`; there is no fallback to the
//! backing store.

use std::path::Path;
use std::sync::LazyLock;
use std::time::SystemTime;

use crate::stats::StatsSnapshot;
use crate::vfs::{DirEntry, FileAttr, FileType, FsError, FsResult, OpenFlags};

use super::classify::RESERVED_NAME;

static PROCESS_START: LazyLock<SystemTime> = LazyLock::new(SystemTime::now);

/// Timestamp reported for every control entry.
pub fn process_start() -> SystemTime {
    *PROCESS_START
}

/// Fix the control entries' timestamp now rather than on first access.
pub fn pin_process_start() {
    LazyLock::force(&PROCESS_START);
}

/// Version line served by `.utopfs/version`.
pub fn version_string() -> String {
    format!("utopfs version {}\n", env!("CARGO_PKG_VERSION"))
}

/// Inputs a control file may render from.
#[derive(Debug, Clone, Copy)]
pub struct ControlContext {
    pub stats: StatsSnapshot,
    pub mounted_at: SystemTime,
}

/// One synthetic entry under `.utopfs`.
#[derive(Debug)]
pub struct ControlEntry {
    pub name: &'static str,
    pub kind: FileType,
    generate: fn(&ControlContext) -> String,
}

impl ControlEntry {
    /// Render the entry's current content.
    pub fn render(&self, ctx: &ControlContext) -> String {
        (self.generate)(ctx)
    }
}

/// Every entry of the control directory, ordered by name.
pub static CONTROL_ENTRIES: &[ControlEntry] = &[
    ControlEntry {
        name: "stats",
        kind: FileType::File,
        generate: render_stats,
    },
    ControlEntry {
        name: "version",
        kind: FileType::File,
        generate: render_version,
    },
];

fn render_version(_ctx: &ControlContext) -> String {
    version_string()
}

fn render_stats(ctx: &ControlContext) -> String {
    let mounted_secs = SystemTime::now()
        .duration_since(ctx.mounted_at)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let s = &ctx.stats;
    format!(
        "rdops {}\nrdbytes {}\nwrops {}\nwrbytes {}\nmounted_secs {}\n",
        s.rdops, s.rdbytes, s.wrops, s.wrbytes, mounted_secs
    )
}

/// What a control-relative path names.
enum Target {
    Root,
    Entry(&'static ControlEntry),
}

/// Serves the control subtree. Holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlProvider;

impl ControlProvider {
    fn resolve(relative: &Path) -> FsResult<Target> {
        if relative.as_os_str().is_empty() {
            return Ok(Target::Root);
        }
        CONTROL_ENTRIES
            .iter()
            .find(|e| Path::new(e.name) == relative)
            .map(Target::Entry)
            .ok_or_else(|| {
                FsError::not_found(Path::new(RESERVED_NAME).join(relative).display().to_string())
            })
    }

    fn dir_attr() -> FileAttr {
        FileAttr::stamped(FileType::Directory, 0, 0o555, 2, process_start())
    }

    fn entry_attr(entry: &ControlEntry, ctx: &ControlContext) -> FileAttr {
        match entry.kind {
            FileType::Directory => Self::dir_attr(),
            kind => {
                let size = entry.render(ctx).len() as u64;
                FileAttr::stamped(kind, size, 0o444, 1, process_start())
            }
        }
    }

    /// Attributes of a control path.
    pub fn getattr(&self, relative: &Path, ctx: &ControlContext) -> FsResult<FileAttr> {
        match Self::resolve(relative)? {
            Target::Root => Ok(Self::dir_attr()),
            Target::Entry(entry) => Ok(Self::entry_attr(entry, ctx)),
        }
    }

    /// List a control directory.
    pub fn readdir(&self, relative: &Path) -> FsResult<Vec<DirEntry>> {
        match Self::resolve(relative)? {
            Target::Root => Ok(CONTROL_ENTRIES
                .iter()
                .map(|e| DirEntry::new(e.name, e.kind))
                .collect()),
            Target::Entry(entry) => Err(FsError::not_a_directory(entry.name)),
        }
    }

    /// Check that a control path may be opened with `flags`.
    pub fn open(&self, relative: &Path, flags: OpenFlags, ctx: &ControlContext) -> FsResult<FileAttr> {
        let attr = self.getattr(relative, ctx)?;
        if flags.mutates() {
            return Err(FsError::read_only_violation(
                Path::new(RESERVED_NAME).join(relative).display().to_string(),
            ));
        }
        Ok(attr)
    }

    /// Read generated content with regular-file offset semantics.
    pub fn read(
        &self,
        relative: &Path,
        offset: u64,
        size: u32,
        ctx: &ControlContext,
    ) -> FsResult<Vec<u8>> {
        match Self::resolve(relative)? {
            Target::Root => Err(FsError::is_a_directory(RESERVED_NAME)),
            Target::Entry(entry) if entry.kind.is_dir() => Err(FsError::is_a_directory(entry.name)),
            Target::Entry(entry) => {
                let content = entry.render(ctx).into_bytes();
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
                let end = start.saturating_add(size as usize).min(content.len());
                Ok(content[start..end].to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ControlContext {
        ControlContext {
            stats: StatsSnapshot {
                rdops: 3,
                rdbytes: 42,
                wrops: 0,
                wrbytes: 0,
            },
            mounted_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_version_first_line_has_token() {
        let data = ControlProvider
            .read(Path::new("version"), 0, 4096, &ctx())
            .unwrap();
        let text = String::from_utf8(data).unwrap();
        let first = text.lines().next().unwrap();
        assert!(first.contains("version"), "{first:?}");
        assert!(first.starts_with("utopfs version "));
    }

    #[test]
    fn test_root_lists_exactly_the_table() {
        let names: Vec<_> = ControlProvider
            .readdir(Path::new(""))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["stats", "version"]);
    }

    #[test]
    fn test_unknown_is_not_found() {
        let ctx = ctx();
        for path in ["nope", "version/extra", "stats/x"] {
            let err = ControlProvider.getattr(Path::new(path), &ctx).unwrap_err();
            assert!(matches!(err, FsError::NotFound(_)), "{path}: {err:?}");
        }
        assert!(ControlProvider.readdir(Path::new("nope")).is_err());
    }

    #[test]
    fn test_attrs_are_read_only_and_sized() {
        let ctx = ctx();
        let dir = ControlProvider.getattr(Path::new(""), &ctx).unwrap();
        assert!(dir.is_dir());
        assert!(dir.is_read_only());
        assert_eq!(dir.mtime, process_start());
        pin_process_start();
        assert_eq!(dir.mtime, process_start());

        let version = ControlProvider.getattr(Path::new("version"), &ctx).unwrap();
        assert!(version.is_file());
        assert_eq!(version.perm, 0o444);
        assert_eq!(version.size, version_string().len() as u64);
        assert_eq!(version.mtime, process_start());
    }

    #[test]
    fn test_read_offsets() {
        let ctx = ctx();
        let full = version_string().into_bytes();
        let tail = ControlProvider.read(Path::new("version"), 7, 4096, &ctx).unwrap();
        assert_eq!(tail, &full[7..]);

        let short = ControlProvider.read(Path::new("version"), 0, 6, &ctx).unwrap();
        assert_eq!(short, b"utopfs");

        let past = ControlProvider.read(Path::new("version"), 10_000, 10, &ctx).unwrap();
        assert!(past.is_empty());
    }

    #[test]
    fn test_stats_renders_counters() {
        let data = ControlProvider.read(Path::new("stats"), 0, 4096, &ctx()).unwrap();
        let text = String::from_utf8(data).unwrap();
        assert!(text.contains("rdops 3\n"));
        assert!(text.contains("rdbytes 42\n"));
        assert!(text.contains("mounted_secs "));
    }

    #[test]
    fn test_open_for_write_is_violation() {
        let ctx = ctx();
        assert!(ControlProvider.open(Path::new("version"), OpenFlags::read(), &ctx).is_ok());
        let err = ControlProvider
            .open(Path::new("version"), OpenFlags::write(), &ctx)
            .unwrap_err();
        assert!(matches!(err, FsError::ReadOnlyViolation(_)));

        let err = ControlProvider
            .open(Path::new("missing"), OpenFlags::write(), &ctx)
            .unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[test]
    fn test_read_directory_fails() {
        let err = ControlProvider.read(Path::new(""), 0, 10, &ctx()).unwrap_err();
        assert!(matches!(err, FsError::IsADirectory(_)));
    }
}
