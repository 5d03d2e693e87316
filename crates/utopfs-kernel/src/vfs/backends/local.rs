//! Host directory backing store.
//!
//! Stores real files in a directory on the host filesystem. Every path is
//! resolved under `root`; attempts to escape via `..` or symlinks are
//! rejected.

use async_trait::async_trait;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::vfs::error::{FsError, FsResult};
use crate::vfs::ops::BackingStore;
use crate::vfs::types::{DirEntry, FileAttr, FileType, SetAttr, StatFs};

/// Host directory backing store.
///
/// If `root` is `/var/lib/utopfs`, then `read("docs/a.txt")` reads
/// `/var/lib/utopfs/docs/a.txt`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    read_only: bool,
}

impl LocalBackend {
    /// Create a store rooted at the given directory.
    ///
    /// The root is canonicalized when possible so the escape check compares
    /// like with like (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            read_only: false,
        }
    }

    /// Create a read-only store.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::new(root)
        }
    }

    /// Resolve a relative path to an absolute path within the root.
    fn resolve(&self, path: &Path) -> FsResult<PathBuf> {
        let path = path.strip_prefix("/").unwrap_or(path);
        if path.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }

        let full = self.root.join(path);

        // Existing paths canonicalize fully; new ones through their parent.
        let canonical = if full.exists() {
            dunce::canonicalize(&full)?
        } else {
            let parent = full.parent().ok_or_else(|| FsError::invalid_path("no parent"))?;
            let filename = full
                .file_name()
                .ok_or_else(|| FsError::invalid_path("no filename"))?;
            if parent.exists() {
                dunce::canonicalize(parent)?.join(filename)
            } else if path.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(FsError::path_escapes_root(path.display().to_string()));
            } else {
                full
            }
        };

        if !canonical.starts_with(&self.root) {
            return Err(FsError::path_escapes_root(format!(
                "{} is not under {}",
                canonical.display(),
                self.root.display()
            )));
        }

        Ok(canonical)
    }

    /// Resolve without following a symlink at the leaf.
    ///
    /// Only the parent is canonicalized and checked against the root, so
    /// operations on a link act on the link itself.
    fn resolve_entry(&self, path: &Path) -> FsResult<PathBuf> {
        let relative = path.strip_prefix("/").unwrap_or(path);
        if relative.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }

        let full = self.root.join(relative);
        let (Some(parent), Some(name)) = (full.parent(), full.file_name()) else {
            return Err(FsError::invalid_path(relative.display().to_string()));
        };
        let parent = dunce::canonicalize(parent)?;
        if !parent.starts_with(&self.root) {
            return Err(FsError::path_escapes_root(relative.display().to_string()));
        }
        Ok(parent.join(name))
    }

    fn check_writable(&self) -> FsResult<()> {
        if self.read_only {
            Err(FsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
        let kind = if meta.file_type().is_symlink() {
            FileType::Symlink
        } else if meta.is_dir() {
            FileType::Directory
        } else {
            FileType::File
        };

        FileAttr {
            size: meta.len(),
            kind,
            perm: meta.permissions().mode() & 0o7777,
            mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            atime: meta.accessed().ok(),
            ctime: meta.created().ok(),
            nlink: meta.nlink() as u32,
            uid: Some(meta.uid()),
            gid: Some(meta.gid()),
        }
    }
}

#[async_trait]
impl BackingStore for LocalBackend {
    async fn stat(&self, path: &Path) -> FsResult<FileAttr> {
        let full_path = self.resolve_entry(path)?;
        let meta = fs::symlink_metadata(&full_path).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn list(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        let full_path = self.resolve(path)?;
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            let kind = if file_type.is_dir() {
                FileType::Directory
            } else if file_type.is_symlink() {
                FileType::Symlink
            } else {
                FileType::File
            };
            entries.push(DirEntry::new(entry.file_name().to_string_lossy(), kind));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let full_path = self.resolve(path)?;
        let mut file = fs::File::open(&full_path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;

        let mut buffer = Vec::with_capacity(size as usize);
        file.take(u64::from(size)).read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    async fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        let full_path = self.resolve_entry(path)?;
        Ok(fs::read_link(&full_path).await?)
    }

    async fn probe(&self) -> FsResult<()> {
        let meta = fs::metadata(&self.root).await?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(FsError::not_a_directory(self.root.display().to_string()))
        }
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> FsResult<u32> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        let mut file = fs::OpenOptions::new().write(true).open(&full_path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(data.len() as u32)
    }

    async fn create(&self, path: &Path, mode: u32) -> FsResult<FileAttr> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&full_path)
            .await?;
        let meta = file.metadata().await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> FsResult<FileAttr> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        fs::DirBuilder::new().mode(mode).create(&full_path).await?;
        let meta = fs::metadata(&full_path).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn unlink(&self, path: &Path) -> FsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve_entry(path)?;
        Ok(fs::remove_file(&full_path).await?)
    }

    async fn rmdir(&self, path: &Path) -> FsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve_entry(path)?;
        if full_path == self.root {
            return Err(FsError::permission_denied("cannot remove root"));
        }
        Ok(fs::remove_dir(&full_path).await?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        self.check_writable()?;
        let from_path = self.resolve_entry(from)?;
        let to_path = self.resolve_entry(to)?;
        Ok(fs::rename(&from_path, &to_path).await?)
    }

    async fn truncate(&self, path: &Path, size: u64) -> FsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        let file = fs::OpenOptions::new().write(true).open(&full_path).await?;
        Ok(file.set_len(size).await?)
    }

    async fn setattr(&self, path: &Path, attr: SetAttr) -> FsResult<FileAttr> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        if let Some(size) = attr.size {
            let file = fs::OpenOptions::new().write(true).open(&full_path).await?;
            file.set_len(size).await?;
        }

        if let Some(perm) = attr.perm {
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(perm)).await?;
        }

        if attr.mtime.is_some() || attr.atime.is_some() || attr.uid.is_some() || attr.gid.is_some() {
            tracing::debug!(path = %path.display(), "ignoring time/ownership change on local store");
        }

        self.stat(path).await
    }

    async fn symlink(&self, path: &Path, target: &Path) -> FsResult<FileAttr> {
        self.check_writable()?;
        let full_path = self.resolve_entry(path)?;
        fs::symlink(target, &full_path).await?;
        let meta = fs::symlink_metadata(&full_path).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    async fn statfs(&self) -> FsResult<StatFs> {
        let stat = rustix::fs::statvfs(&self.root).map_err(|e| FsError::Io(e.into()))?;
        Ok(StatFs {
            blocks: stat.f_blocks,
            bfree: stat.f_bfree,
            bavail: stat.f_bavail,
            files: stat.f_files,
            ffree: stat.f_ffree,
            bsize: stat.f_bsize as u32,
            namelen: stat.f_namemax as u32,
            frsize: stat.f_frsize as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        (backend, dir)
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let (backend, _dir) = setup();

        backend.create(Path::new("test.txt"), 0o644).await.unwrap();
        backend.write(Path::new("test.txt"), 0, b"hello world").await.unwrap();

        assert_eq!(backend.read(Path::new("test.txt"), 0, 100).await.unwrap(), b"hello world");
        assert_eq!(backend.read(Path::new("test.txt"), 6, 5).await.unwrap(), b"world");
    }

    #[tokio::test]
    async fn test_mkdir_and_list() {
        let (backend, _dir) = setup();

        backend.mkdir(Path::new("subdir"), 0o755).await.unwrap();
        backend.create(Path::new("subdir/file.txt"), 0o644).await.unwrap();
        backend.create(Path::new("root.txt"), 0o644).await.unwrap();

        let names: Vec<_> = backend
            .list(Path::new(""))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["root.txt", "subdir"]);
    }

    #[tokio::test]
    async fn test_read_only() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::read_only(dir.path());

        let result = backend.create(Path::new("test.txt"), 0o644).await;
        assert!(matches!(result, Err(FsError::ReadOnly)));
        assert!(BackingStore::read_only(&backend));
    }

    #[tokio::test]
    async fn test_path_escape_blocked() {
        let (backend, _dir) = setup();

        let result = backend.read(Path::new("../../../etc/passwd"), 0, 100).await;
        assert!(matches!(result, Err(FsError::PathEscapesRoot(_))));
    }

    #[tokio::test]
    async fn test_symlink_and_readlink() {
        let (backend, _dir) = setup();

        backend.create(Path::new("target.txt"), 0o644).await.unwrap();
        backend.symlink(Path::new("link.txt"), Path::new("target.txt")).await.unwrap();

        let target = backend.readlink(Path::new("link.txt")).await.unwrap();
        assert_eq!(target, Path::new("target.txt"));
        assert!(backend.stat(Path::new("link.txt")).await.unwrap().is_symlink());
        assert!(backend.stat(Path::new("target.txt")).await.unwrap().is_file());
    }

    #[tokio::test]
    async fn test_symlink_out_of_root_is_inert() {
        let (backend, dir) = setup();
        let outside = dir.path().parent().unwrap().to_path_buf();

        let attr = backend.symlink(Path::new("out.lnk"), &outside).await.unwrap();
        assert!(attr.is_symlink());
        assert!(backend.stat(Path::new("out.lnk")).await.unwrap().is_symlink());
        assert_eq!(backend.readlink(Path::new("out.lnk")).await.unwrap(), outside);

        // Following the link is still refused.
        let result = backend.read(Path::new("out.lnk"), 0, 10).await;
        assert!(matches!(result, Err(FsError::PathEscapesRoot(_))));

        // Unlink removes the link, never what it points at.
        backend.unlink(Path::new("out.lnk")).await.unwrap();
        assert!(std::fs::symlink_metadata(dir.path().join("out.lnk")).is_err());
    }

    #[tokio::test]
    async fn test_unlink_link_keeps_target() {
        let (backend, _dir) = setup();

        backend.create(Path::new("target.txt"), 0o644).await.unwrap();
        backend.symlink(Path::new("link.txt"), Path::new("target.txt")).await.unwrap();
        backend.unlink(Path::new("link.txt")).await.unwrap();

        assert!(backend.stat(Path::new("link.txt")).await.unwrap_err().is_not_found());
        assert!(backend.stat(Path::new("target.txt")).await.unwrap().is_file());
    }

    #[tokio::test]
    async fn test_rename_and_truncate() {
        let (backend, _dir) = setup();

        backend.create(Path::new("old.txt"), 0o644).await.unwrap();
        backend.write(Path::new("old.txt"), 0, b"content").await.unwrap();
        backend.rename(Path::new("old.txt"), Path::new("new.txt")).await.unwrap();
        assert!(backend.stat(Path::new("old.txt")).await.unwrap_err().is_not_found());

        backend.truncate(Path::new("new.txt"), 4).await.unwrap();
        assert_eq!(backend.read(Path::new("new.txt"), 0, 100).await.unwrap(), b"cont");
    }

    #[tokio::test]
    async fn test_probe_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path().join("missing"));
        assert!(backend.probe().await.is_err());

        let (ok, _dir) = setup();
        ok.probe().await.unwrap();
    }
}
