//! Filesystem error types.

use std::io;
use thiserror::Error;

/// Error returned by filesystem operations.
///
/// Backing stores produce these directly; the dispatcher forwards them
/// unchanged. Only [`FsError::ReadOnlyViolation`], [`FsError::NotMounted`]
/// and [`FsError::Cancelled`] originate in the namespace layer itself.
#[derive(Debug, Error)]
pub enum FsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Backing store is read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Mutation attempted inside the reserved control subtree.
    #[error("read-only control path: {0}")]
    ReadOnlyViolation(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Path escapes root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Not a symbolic link.
    #[error("not a symbolic link: {0}")]
    NotASymlink(String),

    /// Write or resize past the store's size limit.
    #[error("file too large: {0}")]
    FileTooLarge(String),

    /// The mount is not serving requests (not yet mounted, or unmounting).
    #[error("not mounted")]
    NotMounted,

    /// Request was cancelled while the mount drained.
    #[error("request cancelled by unmount")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a ReadOnlyViolation error.
    pub fn read_only_violation(path: impl Into<String>) -> Self {
        Self::ReadOnlyViolation(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True for errors that mean "nothing there", from either namespace.
    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::NotFound(_) => true,
            FsError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            FsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            FsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            FsError::ReadOnly => {
                io::Error::new(io::ErrorKind::ReadOnlyFilesystem, "filesystem is read-only")
            }
            FsError::ReadOnlyViolation(msg) => {
                io::Error::new(io::ErrorKind::ReadOnlyFilesystem, msg)
            }
            FsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            FsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            FsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            FsError::PathEscapesRoot(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            FsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::NotASymlink(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::FileTooLarge(msg) => io::Error::new(io::ErrorKind::FileTooLarge, msg),
            FsError::NotMounted => io::Error::new(io::ErrorKind::NotConnected, "not mounted"),
            FsError::Cancelled => io::Error::new(io::ErrorKind::Interrupted, "request cancelled"),
            FsError::Io(e) => e,
            FsError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// Filesystem result type.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_covers_io() {
        assert!(FsError::not_found("a").is_not_found());
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(FsError::from(io_err).is_not_found());
        assert!(!FsError::ReadOnly.is_not_found());
    }

    #[test]
    fn test_io_conversion_keeps_kind() {
        let err: io::Error = FsError::read_only_violation(".utopfs/version").into();
        assert_eq!(err.kind(), io::ErrorKind::ReadOnlyFilesystem);

        let err: io::Error = FsError::NotMounted.into();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
