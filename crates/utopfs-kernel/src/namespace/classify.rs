//! Reserved-name classification.
//!
//! Decides, without I/O, whether a path belongs to the `.utopfs` control
//! subtree or to the backing store. The dispatcher classifies each request
//! exactly once and matches on the result.

use std::path::{Component, Path, PathBuf};

/// Name of the control directory at the mount root.
pub const RESERVED_NAME: &str = ".utopfs";

/// Which namespace a path resolves into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathClassification {
    /// Inside the control subtree; carries the path below `.utopfs`
    /// (empty for the directory itself).
    Control(PathBuf),
    /// Backing store path, normalized and relative to the mount root.
    Real(PathBuf),
    /// A backing store root entry named `.utopfs`. The control subtree
    /// shadows it; it is never served.
    ReservedCollision(PathBuf),
}

impl PathClassification {
    /// True for paths served by the control provider.
    pub fn is_control(&self) -> bool {
        matches!(self, PathClassification::Control(_))
    }

    /// The relative path carried by the classification.
    pub fn relative(&self) -> &Path {
        match self {
            PathClassification::Control(p)
            | PathClassification::Real(p)
            | PathClassification::ReservedCollision(p) => p,
        }
    }
}

/// Lexically normalize a mount-relative path.
///
/// Drops the root, `.` and empty segments; `..` pops (and saturates at the
/// mount root).
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => out.push(s),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Classify a request path.
///
/// A first segment equal to [`RESERVED_NAME`] selects the control subtree;
/// everything else is real. Never returns `ReservedCollision`, because the
/// reserved name always wins for lookups.
pub fn classify(path: &Path) -> PathClassification {
    let normalized = normalize(path);
    let mut components = normalized.components();
    match components.next() {
        Some(Component::Normal(first)) if first == RESERVED_NAME => {
            PathClassification::Control(components.as_path().to_path_buf())
        }
        _ => PathClassification::Real(normalized),
    }
}

/// Classify one entry of a backing store listing of `dir`.
///
/// Returns `ReservedCollision` for a root entry named `.utopfs`.
pub fn classify_listing(dir: &Path, name: &str) -> PathClassification {
    let dir = normalize(dir);
    if dir.as_os_str().is_empty() && name == RESERVED_NAME {
        PathClassification::ReservedCollision(PathBuf::from(name))
    } else {
        PathClassification::Real(dir.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_first_segment_is_control() {
        let cases = [
            (".utopfs", ""),
            ("/.utopfs", ""),
            (".utopfs/", ""),
            ("/.utopfs/version", "version"),
            ("./.utopfs/stats", "stats"),
            ("//.utopfs//version", "version"),
            (".utopfs/nope/deeper", "nope/deeper"),
        ];
        for (input, rest) in cases {
            assert_eq!(
                classify(Path::new(input)),
                PathClassification::Control(PathBuf::from(rest)),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn test_everything_else_is_real() {
        let cases = [
            ("", ""),
            ("/", ""),
            ("docs/a.txt", "docs/a.txt"),
            ("/docs/.utopfs", "docs/.utopfs"),
            (".utopfsx", ".utopfsx"),
            ("utopfs", "utopfs"),
            (".UTOPFS/version", ".UTOPFS/version"),
        ];
        for (input, expected) in cases {
            assert_eq!(
                classify(Path::new(input)),
                PathClassification::Real(PathBuf::from(expected)),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn test_parent_dir_saturates_at_root() {
        assert!(classify(Path::new("../.utopfs/version")).is_control());
        assert!(classify(Path::new("docs/../.utopfs")).is_control());
        assert_eq!(
            classify(Path::new("docs/../a")),
            PathClassification::Real(PathBuf::from("a"))
        );
    }

    #[test]
    fn test_listing_collision_only_at_root() {
        assert_eq!(
            classify_listing(Path::new(""), RESERVED_NAME),
            PathClassification::ReservedCollision(PathBuf::from(RESERVED_NAME))
        );
        assert_eq!(
            classify_listing(Path::new("sub"), RESERVED_NAME),
            PathClassification::Real(PathBuf::from("sub/.utopfs"))
        );
        assert_eq!(
            classify_listing(Path::new("/"), "a.txt").relative(),
            Path::new("a.txt")
        );
    }
}
