//! In-memory backing store.
//!
//! Ephemeral; used by tests and `--store memory`.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use crate::vfs::error::{FsError, FsResult};
use crate::vfs::ops::BackingStore;
use crate::vfs::types::{DirEntry, FileAttr, FileType, SetAttr, StatFs};

/// Largest file the memory store will hold.
pub const MAX_FILE_SIZE: u64 = 1 << 32;

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
    Symlink { target: PathBuf, attr: FileAttr },
}

impl Node {
    fn attr(&self) -> &FileAttr {
        match self {
            Node::File { attr, .. } => attr,
            Node::Directory { attr } => attr,
            Node::Symlink { attr, .. } => attr,
        }
    }

    fn attr_mut(&mut self) -> &mut FileAttr {
        match self {
            Node::File { attr, .. } => attr,
            Node::Directory { attr } => attr,
            Node::Symlink { attr, .. } => attr,
        }
    }
}

/// In-memory backing store.
///
/// Nodes are keyed by normalized relative path; the root is the empty path
/// and always exists. A `BTreeMap` keeps listings ordered for free.
#[derive(Debug)]
pub struct MemoryBackend {
    nodes: RwLock<BTreeMap<PathBuf, Node>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            PathBuf::new(),
            Node::Directory {
                attr: FileAttr::directory(0o755),
            },
        );
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Seed a file (and its parents) synchronously.
    pub fn insert_file(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) {
        let path = Self::normalize(path.as_ref());
        let data = data.into();
        let mut nodes = self.nodes.write();
        Self::ensure_parents(&mut nodes, &path);
        let attr = FileAttr::file(data.len() as u64, 0o644);
        nodes.insert(path, Node::File { data, attr });
    }

    /// Remove leading `/`, resolve `.` and `..`.
    fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::ParentDir => {
                    result.pop();
                }
                Component::Normal(s) => result.push(s),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        result
    }

    fn ensure_parents(nodes: &mut BTreeMap<PathBuf, Node>, path: &Path) {
        let mut current = PathBuf::new();
        for component in path.parent().into_iter().flat_map(|p| p.components()) {
            if let Component::Normal(s) = component {
                current.push(s);
                nodes.entry(current.clone()).or_insert_with(|| Node::Directory {
                    attr: FileAttr::directory(0o755),
                });
            }
        }
    }

    fn path_str(path: &Path) -> String {
        path.display().to_string()
    }

    /// Byte length `offset + len`, refused past [`MAX_FILE_SIZE`].
    fn bounded_len(path: &Path, offset: u64, len: u64) -> FsResult<usize> {
        match offset.checked_add(len) {
            Some(end) if end <= MAX_FILE_SIZE => usize::try_from(end)
                .map_err(|_| FsError::FileTooLarge(Self::path_str(path))),
            _ => Err(FsError::FileTooLarge(Self::path_str(path))),
        }
    }

    fn kind_of(node: &Node) -> FileType {
        match node {
            Node::File { .. } => FileType::File,
            Node::Directory { .. } => FileType::Directory,
            Node::Symlink { .. } => FileType::Symlink,
        }
    }
}

#[async_trait]
impl BackingStore for MemoryBackend {
    async fn stat(&self, path: &Path) -> FsResult<FileAttr> {
        let normalized = Self::normalize(path);
        self.nodes
            .read()
            .get(&normalized)
            .map(|n| n.attr().clone())
            .ok_or_else(|| FsError::not_found(Self::path_str(&normalized)))
    }

    async fn list(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        let normalized = Self::normalize(path);
        let nodes = self.nodes.read();

        match nodes.get(&normalized) {
            Some(Node::Directory { .. }) => {}
            Some(_) => return Err(FsError::not_a_directory(Self::path_str(&normalized))),
            None => return Err(FsError::not_found(Self::path_str(&normalized))),
        }

        let entries = nodes
            .iter()
            .filter(|(p, _)| *p != &normalized && p.parent() == Some(normalized.as_path()))
            .filter_map(|(p, node)| {
                p.file_name()
                    .map(|name| DirEntry::new(name.to_string_lossy(), Self::kind_of(node)))
            })
            .collect();
        Ok(entries)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let normalized = Self::normalize(path);
        match self.nodes.read().get(&normalized) {
            Some(Node::File { data, .. }) => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(size as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(Node::Directory { .. }) => {
                Err(FsError::is_a_directory(Self::path_str(&normalized)))
            }
            Some(Node::Symlink { .. }) => Err(FsError::other("cannot read symlink as file")),
            None => Err(FsError::not_found(Self::path_str(&normalized))),
        }
    }

    async fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        let normalized = Self::normalize(path);
        match self.nodes.read().get(&normalized) {
            Some(Node::Symlink { target, .. }) => Ok(target.clone()),
            Some(_) => Err(FsError::NotASymlink(Self::path_str(&normalized))),
            None => Err(FsError::not_found(Self::path_str(&normalized))),
        }
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> FsResult<u32> {
        let normalized = Self::normalize(path);
        let mut nodes = self.nodes.write();

        match nodes.get_mut(&normalized) {
            Some(Node::File { data: contents, attr }) => {
                let end = Self::bounded_len(&normalized, offset, data.len() as u64)?;
                let offset = end - data.len();
                if end > contents.len() {
                    contents.resize(end, 0);
                }
                contents[offset..end].copy_from_slice(data);
                attr.size = contents.len() as u64;
                attr.mtime = SystemTime::now();
                Ok(data.len() as u32)
            }
            Some(Node::Directory { .. }) => {
                Err(FsError::is_a_directory(Self::path_str(&normalized)))
            }
            Some(Node::Symlink { .. }) => Err(FsError::other("cannot write to symlink")),
            None => Err(FsError::not_found(Self::path_str(&normalized))),
        }
    }

    async fn create(&self, path: &Path, mode: u32) -> FsResult<FileAttr> {
        let normalized = Self::normalize(path);
        let mut nodes = self.nodes.write();

        if nodes.contains_key(&normalized) {
            return Err(FsError::already_exists(Self::path_str(&normalized)));
        }
        Self::ensure_parents(&mut nodes, &normalized);

        let attr = FileAttr::file(0, mode);
        nodes.insert(
            normalized,
            Node::File {
                data: Vec::new(),
                attr: attr.clone(),
            },
        );
        Ok(attr)
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> FsResult<FileAttr> {
        let normalized = Self::normalize(path);
        let mut nodes = self.nodes.write();

        if nodes.contains_key(&normalized) {
            return Err(FsError::already_exists(Self::path_str(&normalized)));
        }
        Self::ensure_parents(&mut nodes, &normalized);

        let attr = FileAttr::directory(mode);
        nodes.insert(normalized, Node::Directory { attr: attr.clone() });
        Ok(attr)
    }

    async fn unlink(&self, path: &Path) -> FsResult<()> {
        let normalized = Self::normalize(path);
        let mut nodes = self.nodes.write();

        match nodes.get(&normalized) {
            Some(Node::Directory { .. }) => {
                Err(FsError::is_a_directory(Self::path_str(&normalized)))
            }
            Some(_) => {
                nodes.remove(&normalized);
                Ok(())
            }
            None => Err(FsError::not_found(Self::path_str(&normalized))),
        }
    }

    async fn rmdir(&self, path: &Path) -> FsResult<()> {
        let normalized = Self::normalize(path);
        if normalized.as_os_str().is_empty() {
            return Err(FsError::permission_denied("cannot remove root"));
        }

        let mut nodes = self.nodes.write();
        match nodes.get(&normalized) {
            Some(Node::Directory { .. }) => {}
            Some(_) => return Err(FsError::not_a_directory(Self::path_str(&normalized))),
            None => return Err(FsError::not_found(Self::path_str(&normalized))),
        }

        if nodes.keys().any(|k| k.parent() == Some(normalized.as_path())) {
            return Err(FsError::directory_not_empty(Self::path_str(&normalized)));
        }

        nodes.remove(&normalized);
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        let from = Self::normalize(from);
        let to = Self::normalize(to);
        if from.as_os_str().is_empty() {
            return Err(FsError::permission_denied("cannot rename root"));
        }

        let mut nodes = self.nodes.write();
        let node = nodes
            .remove(&from)
            .ok_or_else(|| FsError::not_found(Self::path_str(&from)))?;

        if matches!(node, Node::Directory { .. }) {
            let children: Vec<PathBuf> = nodes
                .keys()
                .filter(|k| k.starts_with(&from))
                .cloned()
                .collect();
            for child in children {
                if let (Some(child_node), Ok(relative)) =
                    (nodes.remove(&child), child.strip_prefix(&from))
                {
                    nodes.insert(to.join(relative), child_node);
                }
            }
        }

        Self::ensure_parents(&mut nodes, &to);
        nodes.insert(to, node);
        Ok(())
    }

    async fn truncate(&self, path: &Path, size: u64) -> FsResult<()> {
        let normalized = Self::normalize(path);
        match self.nodes.write().get_mut(&normalized) {
            Some(Node::File { data, attr }) => {
                data.resize(Self::bounded_len(&normalized, size, 0)?, 0);
                attr.size = size;
                attr.mtime = SystemTime::now();
                Ok(())
            }
            Some(Node::Directory { .. }) => {
                Err(FsError::is_a_directory(Self::path_str(&normalized)))
            }
            Some(Node::Symlink { .. }) => Err(FsError::other("cannot truncate symlink")),
            None => Err(FsError::not_found(Self::path_str(&normalized))),
        }
    }

    async fn setattr(&self, path: &Path, set: SetAttr) -> FsResult<FileAttr> {
        let normalized = Self::normalize(path);
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(&normalized)
            .ok_or_else(|| FsError::not_found(Self::path_str(&normalized)))?;

        if let (Some(size), Node::File { data, attr }) = (set.size, &mut *node) {
            data.resize(Self::bounded_len(&normalized, size, 0)?, 0);
            attr.size = size;
        }

        let attr = node.attr_mut();
        if let Some(mtime) = set.mtime {
            attr.mtime = mtime;
        }
        if let Some(atime) = set.atime {
            attr.atime = Some(atime);
        }
        if let Some(perm) = set.perm {
            attr.perm = perm;
        }
        if let Some(uid) = set.uid {
            attr.uid = Some(uid);
        }
        if let Some(gid) = set.gid {
            attr.gid = Some(gid);
        }
        Ok(attr.clone())
    }

    async fn symlink(&self, path: &Path, target: &Path) -> FsResult<FileAttr> {
        let normalized = Self::normalize(path);
        let mut nodes = self.nodes.write();

        if nodes.contains_key(&normalized) {
            return Err(FsError::already_exists(Self::path_str(&normalized)));
        }
        Self::ensure_parents(&mut nodes, &normalized);

        let attr = FileAttr::symlink(target.as_os_str().len() as u64);
        nodes.insert(
            normalized,
            Node::Symlink {
                target: target.to_path_buf(),
                attr: attr.clone(),
            },
        );
        Ok(attr)
    }

    fn read_only(&self) -> bool {
        false
    }

    async fn statfs(&self) -> FsResult<StatFs> {
        Ok(StatFs::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_read() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("test.txt"), 0o644).await.unwrap();
        fs.write(Path::new("test.txt"), 0, b"hello world").await.unwrap();

        let data = fs.read(Path::new("test.txt"), 0, 100).await.unwrap();
        assert_eq!(data, b"hello world");

        let data = fs.read(Path::new("test.txt"), 6, 5).await.unwrap();
        assert_eq!(data, b"world");
    }

    #[tokio::test]
    async fn test_read_past_eof_is_empty() {
        let fs = MemoryBackend::new();
        fs.insert_file("short.txt", "abc");
        let data = fs.read(Path::new("short.txt"), 10, 4).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_list_is_ordered_and_shallow() {
        let fs = MemoryBackend::new();
        fs.insert_file("zeta.txt", "z");
        fs.insert_file("alpha/nested.txt", "n");
        fs.insert_file("beta.txt", "b");

        let names: Vec<_> = fs
            .list(Path::new(""))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta.txt", "zeta.txt"]);

        let nested = fs.list(Path::new("alpha")).await.unwrap();
        assert_eq!(nested, vec![DirEntry::new("nested.txt", FileType::File)]);
    }

    #[tokio::test]
    async fn test_list_file_is_not_a_directory() {
        let fs = MemoryBackend::new();
        fs.insert_file("f", "x");
        let result = fs.list(Path::new("f")).await;
        assert!(matches!(result, Err(FsError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn test_unlink_and_rmdir() {
        let fs = MemoryBackend::new();
        fs.mkdir(Path::new("dir"), 0o755).await.unwrap();
        fs.create(Path::new("dir/file.txt"), 0o644).await.unwrap();

        let result = fs.rmdir(Path::new("dir")).await;
        assert!(matches!(result, Err(FsError::DirectoryNotEmpty(_))));

        fs.unlink(Path::new("dir/file.txt")).await.unwrap();
        fs.rmdir(Path::new("dir")).await.unwrap();
        assert!(fs.stat(Path::new("dir")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rename_directory_moves_children() {
        let fs = MemoryBackend::new();
        fs.insert_file("old/a.txt", "a");
        fs.rename(Path::new("old"), Path::new("new")).await.unwrap();

        assert!(fs.stat(Path::new("old/a.txt")).await.is_err());
        assert_eq!(fs.read(Path::new("new/a.txt"), 0, 10).await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_symlink() {
        let fs = MemoryBackend::new();
        fs.symlink(Path::new("link"), Path::new("/target/path")).await.unwrap();

        let target = fs.readlink(Path::new("link")).await.unwrap();
        assert_eq!(target, Path::new("/target/path"));
        assert!(fs.stat(Path::new("link")).await.unwrap().is_symlink());
    }

    #[tokio::test]
    async fn test_truncate_and_setattr() {
        let fs = MemoryBackend::new();
        fs.insert_file("t.txt", "hello world");
        fs.truncate(Path::new("t.txt"), 5).await.unwrap();
        assert_eq!(fs.read(Path::new("t.txt"), 0, 100).await.unwrap(), b"hello");

        let attr = fs
            .setattr(Path::new("t.txt"), SetAttr::new().with_size(2).with_perm(0o600))
            .await
            .unwrap();
        assert_eq!(attr.size, 2);
        assert_eq!(attr.perm, 0o600);
    }

    #[tokio::test]
    async fn test_oversized_writes_are_refused() {
        let fs = MemoryBackend::new();
        fs.insert_file("a.txt", "abc");

        let result = fs.write(Path::new("a.txt"), u64::MAX - 1, b"xyz").await;
        assert!(matches!(result, Err(FsError::FileTooLarge(_))));
        let result = fs.write(Path::new("a.txt"), i64::MAX as u64, b"x").await;
        assert!(matches!(result, Err(FsError::FileTooLarge(_))));
        let result = fs.write(Path::new("a.txt"), MAX_FILE_SIZE, b"x").await;
        assert!(matches!(result, Err(FsError::FileTooLarge(_))));

        let result = fs.truncate(Path::new("a.txt"), u64::MAX).await;
        assert!(matches!(result, Err(FsError::FileTooLarge(_))));
        let result = fs
            .setattr(Path::new("a.txt"), SetAttr::new().with_size(MAX_FILE_SIZE + 1))
            .await;
        assert!(matches!(result, Err(FsError::FileTooLarge(_))));

        assert_eq!(fs.read(Path::new("a.txt"), 0, 10).await.unwrap(), b"abc");
        assert_eq!(fs.stat(Path::new("a.txt")).await.unwrap().size, 3);
    }

    #[tokio::test]
    async fn test_write_past_end_zero_fills() {
        let fs = MemoryBackend::new();
        fs.insert_file("gap.txt", "ab");
        fs.write(Path::new("gap.txt"), 4, b"cd").await.unwrap();
        assert_eq!(fs.read(Path::new("gap.txt"), 0, 10).await.unwrap(), b"ab\0\0cd");
    }

    #[tokio::test]
    async fn test_path_normalization() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("/a/b/c.txt"), 0o644).await.unwrap();

        assert!(fs.stat(Path::new("a")).await.unwrap().is_dir());
        assert!(fs.stat(Path::new("a/b/c.txt")).await.is_ok());
        assert!(fs.stat(Path::new("a/./b/c.txt")).await.is_ok());
        assert!(fs.stat(Path::new("a/b/../b/c.txt")).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_and_lookup() {
        let fs = MemoryBackend::new();
        fs.probe().await.unwrap();
        fs.insert_file("x", "1");
        let entry = fs.lookup(Path::new("x")).await.unwrap();
        assert_eq!(entry.path, Path::new("x"));
        assert_eq!(entry.attr.size, 1);
    }
}
