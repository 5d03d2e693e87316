//! Core filesystem types.
//!
//! Path-based, no inodes. The FUSE shim owns inode numbering; everything
//! below it speaks in paths relative to the mount root.

use std::time::SystemTime;

/// What kind of node a path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// Attributes of one node.
///
/// Optional fields are left to the FUSE shim to fill (daemon uid/gid,
/// `mtime` for missing times).
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttr {
    /// Size in bytes.
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Permission bits only, no file type bits.
    pub perm: u32,
    pub mtime: SystemTime,
    pub atime: Option<SystemTime>,
    pub ctime: Option<SystemTime>,
    /// Number of hard links.
    pub nlink: u32,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl FileAttr {
    /// Fresh regular file, stamped now.
    pub fn file(size: u64, perm: u32) -> Self {
        Self::stamped(FileType::File, size, perm, 1, SystemTime::now())
    }

    pub fn directory(perm: u32) -> Self {
        // . and ..
        Self::stamped(FileType::Directory, 0, perm, 2, SystemTime::now())
    }

    /// Symlink attributes; size is the target length.
    pub fn symlink(target_len: u64) -> Self {
        Self::stamped(FileType::Symlink, target_len, 0o777, 1, SystemTime::now())
    }

    /// Attributes with every timestamp pinned to `at`.
    pub fn stamped(kind: FileType, size: u64, perm: u32, nlink: u32, at: SystemTime) -> Self {
        Self {
            size,
            kind,
            perm,
            mtime: at,
            atime: Some(at),
            ctime: Some(at),
            nlink,
            uid: None,
            gid: None,
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }

    /// True if no write bit is set.
    pub fn is_read_only(&self) -> bool {
        self.perm & 0o222 == 0
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Single path segment.
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}

/// Requested attribute changes; `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct SetAttr {
    pub size: Option<u64>,
    pub mtime: Option<SystemTime>,
    /// New access time.
    pub atime: Option<SystemTime>,
    /// New permissions.
    pub perm: Option<u32>,
    /// New user ID.
    pub uid: Option<u32>,
    /// New group ID.
    pub gid: Option<u32>,
}

impl SetAttr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set permissions.
    pub fn with_perm(mut self, perm: u32) -> Self {
        self.perm = Some(perm);
        self
    }

    /// True if nothing would change.
    pub fn is_empty(&self) -> bool {
        self.size.is_none()
            && self.mtime.is_none()
            && self.atime.is_none()
            && self.perm.is_none()
            && self.uid.is_none()
            && self.gid.is_none()
    }
}

/// `statvfs`-style capacity report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFs {
    /// Total blocks.
    pub blocks: u64,
    /// Free blocks.
    pub bfree: u64,
    /// Blocks available to unprivileged users.
    pub bavail: u64,
    /// Total inodes.
    pub files: u64,
    /// Free inodes.
    pub ffree: u64,
    /// Block size.
    pub bsize: u32,
    /// Maximum name length.
    pub namelen: u32,
    /// Fragment size.
    pub frsize: u32,
}

impl Default for StatFs {
    fn default() -> Self {
        Self {
            blocks: 1024 * 1024,
            bfree: 512 * 1024,
            bavail: 512 * 1024,
            files: 1024 * 1024,
            ffree: 512 * 1024,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        }
    }
}

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Truncate on open.
    pub truncate: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            truncate: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Read-write access.
    pub fn write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// True if the open would modify the file.
    pub fn mutates(&self) -> bool {
        self.write || self.append || self.truncate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type() {
        assert!(FileType::File.is_file());
        assert!(!FileType::File.is_dir());
        assert!(FileType::Directory.is_dir());
        assert!(FileType::Symlink.is_symlink());
    }

    #[test]
    fn test_file_attr_constructors() {
        let file = FileAttr::file(1024, 0o644);
        assert!(file.is_file());
        assert_eq!(file.size, 1024);
        assert!(!file.is_read_only());

        let dir = FileAttr::directory(0o555);
        assert!(dir.is_dir());
        assert_eq!(dir.nlink, 2);
        assert!(dir.is_read_only());
    }

    #[test]
    fn test_stamped_pins_all_times() {
        let at = SystemTime::UNIX_EPOCH;
        let attr = FileAttr::stamped(FileType::File, 3, 0o444, 1, at);
        assert_eq!(attr.mtime, at);
        assert_eq!(attr.atime, Some(at));
        assert_eq!(attr.ctime, Some(at));
    }

    #[test]
    fn test_setattr_builder() {
        assert!(SetAttr::new().is_empty());
        let attr = SetAttr::new().with_size(2048).with_perm(0o600);
        assert_eq!(attr.size, Some(2048));
        assert_eq!(attr.perm, Some(0o600));
        assert!(!attr.is_empty());
    }

    #[test]
    fn test_open_flags() {
        assert!(!OpenFlags::read().mutates());
        assert!(OpenFlags::write().mutates());
        let append = OpenFlags {
            append: true,
            ..OpenFlags::read()
        };
        assert!(append.mutates());
    }
}
