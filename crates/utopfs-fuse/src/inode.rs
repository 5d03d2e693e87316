//! Inode numbering for the path-based dispatcher.
//!
//! The kernel speaks inodes; everything below the shim speaks paths
//! relative to the mount root. Numbers are handed out on lookup and
//! reclaimed when the kernel forgets them. The root is pinned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::constants::ROOT_INO;

#[derive(Debug)]
struct Node {
    path: PathBuf,
    lookups: u64,
}

#[derive(Debug)]
pub struct InodeTable {
    by_ino: HashMap<u64, Node>,
    by_path: HashMap<PathBuf, u64>,
    next: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut by_ino = HashMap::new();
        let mut by_path = HashMap::new();
        by_ino.insert(
            ROOT_INO,
            Node {
                path: PathBuf::new(),
                lookups: 1,
            },
        );
        by_path.insert(PathBuf::new(), ROOT_INO);
        Self {
            by_ino,
            by_path,
            next: ROOT_INO + 1,
        }
    }

    /// Path of `ino`, if the kernel still knows it.
    pub fn path(&self, ino: u64) -> Option<&Path> {
        self.by_ino.get(&ino).map(|node| node.path.as_path())
    }

    /// Inode for `path`, allocating one if needed, and count one lookup.
    pub fn lookup(&mut self, path: &Path) -> u64 {
        if let Some(&ino) = self.by_path.get(path) {
            if let Some(node) = self.by_ino.get_mut(&ino) {
                node.lookups += 1;
            }
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.by_ino.insert(
            ino,
            Node {
                path: path.to_path_buf(),
                lookups: 1,
            },
        );
        self.by_path.insert(path.to_path_buf(), ino);
        ino
    }

    /// Inode for `path` without counting a lookup (readdir entries).
    pub fn peek(&self, path: &Path) -> Option<u64> {
        self.by_path.get(path).copied()
    }

    /// Drop `n` kernel references to `ino`.
    pub fn forget(&mut self, ino: u64, n: u64) {
        if ino == ROOT_INO {
            return;
        }
        let Some(node) = self.by_ino.get_mut(&ino) else {
            return;
        };
        node.lookups = node.lookups.saturating_sub(n);
        if node.lookups == 0 {
            if let Some(node) = self.by_ino.remove(&ino) {
                if self.by_path.get(&node.path) == Some(&ino) {
                    self.by_path.remove(&node.path);
                }
            }
        }
    }

    /// Detach `path` from its inode after unlink or rmdir.
    ///
    /// The inode stays valid until forgotten, so open handles keep working.
    pub fn unlink(&mut self, path: &Path) {
        self.by_path.remove(path);
    }

    /// Move `from` and everything below it to `to`.
    pub fn rename(&mut self, from: &Path, to: &Path) {
        if let Some(ino) = self.by_path.remove(to) {
            tracing::trace!(ino, path = %to.display(), "rename replaced target");
        }
        let moved: Vec<(PathBuf, u64)> = self
            .by_path
            .iter()
            .filter(|(path, _)| path.starts_with(from))
            .map(|(path, ino)| (path.clone(), *ino))
            .collect();
        for (old, ino) in moved {
            self.by_path.remove(&old);
            let new = match old.strip_prefix(from) {
                Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
                Ok(rest) => to.join(rest),
                Err(_) => continue,
            };
            if let Some(node) = self.by_ino.get_mut(&ino) {
                node.path = new.clone();
            }
            self.by_path.insert(new, ino);
        }
    }

    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ino.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_pinned() {
        let mut table = InodeTable::new();
        assert_eq!(table.path(ROOT_INO), Some(Path::new("")));
        assert_eq!(table.lookup(Path::new("")), ROOT_INO);
        table.forget(ROOT_INO, 100);
        assert_eq!(table.path(ROOT_INO), Some(Path::new("")));
    }

    #[test]
    fn test_lookup_is_stable_until_forgotten() {
        let mut table = InodeTable::new();
        let a = table.lookup(Path::new("a.txt"));
        assert_eq!(table.lookup(Path::new("a.txt")), a);
        assert_ne!(table.lookup(Path::new("b.txt")), a);

        table.forget(a, 1);
        assert_eq!(table.path(a), Some(Path::new("a.txt")));
        table.forget(a, 1);
        assert_eq!(table.path(a), None);
        assert_eq!(table.peek(Path::new("a.txt")), None);
    }

    #[test]
    fn test_rename_moves_subtree() {
        let mut table = InodeTable::new();
        let dir = table.lookup(Path::new("docs"));
        let file = table.lookup(Path::new("docs/a.txt"));
        let other = table.lookup(Path::new("docsx"));

        table.rename(Path::new("docs"), Path::new("archive/docs"));
        assert_eq!(table.path(dir), Some(Path::new("archive/docs")));
        assert_eq!(table.path(file), Some(Path::new("archive/docs/a.txt")));
        assert_eq!(table.path(other), Some(Path::new("docsx")));
        assert_eq!(table.peek(Path::new("archive/docs/a.txt")), Some(file));
        assert_eq!(table.peek(Path::new("docs/a.txt")), None);
    }

    #[test]
    fn test_unlink_keeps_inode_until_forget() {
        let mut table = InodeTable::new();
        let a = table.lookup(Path::new("a.txt"));
        table.unlink(Path::new("a.txt"));
        assert_eq!(table.path(a), Some(Path::new("a.txt")));

        let replacement = table.lookup(Path::new("a.txt"));
        assert_ne!(replacement, a);

        table.forget(a, 1);
        assert_eq!(table.peek(Path::new("a.txt")), Some(replacement));
    }
}
