//! FUSE transport.
//!
//! [`FuseBridge`] attaches a dispatcher to the kernel with `fuser`. The
//! session thread calls [`UtopFuse`], which maps inodes to mount-relative
//! paths and blocks on the async dispatcher through a runtime handle.
//!
//! Detach runs the configured `fusermount -u` first so a busy mount point
//! is reported instead of silently lingering.

use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    BackgroundSession, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use libc::{EINVAL, ENOENT, c_int};
use tokio::runtime::Handle;

use utopfs_kernel::mount::{BridgeSession, KernelBridge};
use utopfs_kernel::{Dispatcher, FileAttr, FileType, FsError, OpenFlags, SetAttr, classify};

use crate::constants::{DEFAULT_ATTR_TTL, DEFAULT_FS_NAME, DEFAULT_FUSERMOUNT, ROOT_INO};
use crate::inode::InodeTable;

/// Placeholder `d_ino` for listing entries the kernel has not looked up.
const UNKNOWN_INO: u64 = u64::MAX;

const BLOCK_SIZE: u32 = 4096;

/// Mount-time settings for the FUSE transport.
#[derive(Debug, Clone)]
pub struct FuseOptions {
    pub fs_name: String,
    pub attr_ttl: Duration,
    pub fusermount: String,
    pub allow_other: bool,
    pub read_only: bool,
}

impl Default for FuseOptions {
    fn default() -> Self {
        Self {
            fs_name: DEFAULT_FS_NAME.to_string(),
            attr_ttl: DEFAULT_ATTR_TTL,
            fusermount: DEFAULT_FUSERMOUNT.to_string(),
            allow_other: false,
            read_only: false,
        }
    }
}

impl FuseOptions {
    fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.fs_name.clone()),
            MountOption::Subtype("utopfs".to_string()),
            MountOption::DefaultPermissions,
        ];
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        if self.read_only {
            options.push(MountOption::RO);
        }
        options
    }
}

/// Attaches dispatchers to the kernel through `/dev/fuse`.
#[derive(Debug, Clone)]
pub struct FuseBridge {
    runtime: Handle,
    options: FuseOptions,
}

impl FuseBridge {
    /// `runtime` must be a multi-threaded runtime: FUSE callbacks block on
    /// it from the session thread.
    pub fn new(runtime: Handle, options: FuseOptions) -> Self {
        Self { runtime, options }
    }
}

impl KernelBridge for FuseBridge {
    fn attach(&self, point: &Path, dispatcher: Arc<Dispatcher>) -> io::Result<Box<dyn BridgeSession>> {
        let fs = UtopFuse::new(dispatcher, self.runtime.clone(), self.options.attr_ttl);
        let session = fuser::spawn_mount2(fs, point, &self.options.mount_options())?;
        tracing::info!(point = %point.display(), fs_name = %self.options.fs_name, "fuse session started");
        Ok(Box::new(FuseSession {
            point: point.to_path_buf(),
            fusermount: self.options.fusermount.clone(),
            session: Some(session),
        }))
    }
}

/// A live kernel mount.
pub struct FuseSession {
    point: PathBuf,
    fusermount: String,
    session: Option<BackgroundSession>,
}

impl BridgeSession for FuseSession {
    fn detach(&mut self) -> io::Result<()> {
        let output = Command::new(&self.fusermount)
            .arg("-u")
            .arg(&self.point)
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(io::Error::new(
                io::ErrorKind::ResourceBusy,
                format!("{} -u {}: {}", self.fusermount, self.point.display(), stderr.trim()),
            ));
        }
        if let Some(session) = self.session.take() {
            session.join();
        }
        tracing::info!(point = %self.point.display(), "fuse session ended");
        Ok(())
    }
}

/// Errno reported to the kernel for a dispatcher error.
pub fn errno(err: &FsError) -> c_int {
    match err {
        FsError::NotFound(_) => libc::ENOENT,
        FsError::AlreadyExists(_) => libc::EEXIST,
        FsError::PermissionDenied(_) | FsError::PathEscapesRoot(_) => libc::EACCES,
        FsError::ReadOnly | FsError::ReadOnlyViolation(_) => libc::EROFS,
        FsError::NotADirectory(_) => libc::ENOTDIR,
        FsError::IsADirectory(_) => libc::EISDIR,
        FsError::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
        FsError::InvalidPath(_) | FsError::NotASymlink(_) => libc::EINVAL,
        FsError::FileTooLarge(_) => libc::EFBIG,
        FsError::NotMounted => libc::ENOTCONN,
        FsError::Cancelled => libc::EINTR,
        FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        FsError::Other(_) => libc::EIO,
    }
}

/// Decode `open(2)` flags.
pub fn open_flags(flags: i32) -> OpenFlags {
    let access = flags & libc::O_ACCMODE;
    OpenFlags {
        read: access != libc::O_WRONLY,
        write: access == libc::O_WRONLY || access == libc::O_RDWR,
        append: flags & libc::O_APPEND != 0,
        truncate: flags & libc::O_TRUNC != 0,
    }
}

fn system_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

fn fuse_kind(kind: FileType) -> fuser::FileType {
    match kind {
        FileType::File => fuser::FileType::RegularFile,
        FileType::Directory => fuser::FileType::Directory,
        FileType::Symlink => fuser::FileType::Symlink,
    }
}

/// The `fuser` filesystem for one mount.
pub struct UtopFuse {
    dispatcher: Arc<Dispatcher>,
    runtime: Handle,
    inodes: InodeTable,
    ttl: Duration,
    uid: u32,
    gid: u32,
}

impl UtopFuse {
    pub fn new(dispatcher: Arc<Dispatcher>, runtime: Handle, ttl: Duration) -> Self {
        Self {
            dispatcher,
            runtime,
            inodes: InodeTable::new(),
            ttl,
            uid: rustix::process::getuid().as_raw(),
            gid: rustix::process::getgid().as_raw(),
        }
    }

    /// Control entries change size and visibility on their own; never cache them.
    fn ttl_for(&self, path: &Path) -> Duration {
        if classify(path).is_control() {
            Duration::ZERO
        } else {
            self.ttl
        }
    }

    fn path(&self, ino: u64) -> Result<PathBuf, c_int> {
        self.inodes.path(ino).map(Path::to_path_buf).ok_or(ENOENT)
    }

    fn child(&self, parent: u64, name: &OsStr) -> Result<PathBuf, c_int> {
        Ok(self.path(parent)?.join(name))
    }

    pub fn fuse_attr(&self, ino: u64, attr: &FileAttr) -> fuser::FileAttr {
        fuser::FileAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: attr.atime.unwrap_or(attr.mtime),
            mtime: attr.mtime,
            ctime: attr.ctime.unwrap_or(attr.mtime),
            crtime: attr.ctime.unwrap_or(attr.mtime),
            kind: fuse_kind(attr.kind),
            perm: (attr.perm & 0o7777) as u16,
            nlink: attr.nlink,
            uid: attr.uid.unwrap_or(self.uid),
            gid: attr.gid.unwrap_or(self.gid),
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn reply_entry(&mut self, path: &Path, attr: &FileAttr, reply: ReplyEntry) {
        let ino = self.inodes.lookup(path);
        let ttl = self.ttl_for(path);
        reply.entry(&ttl, &self.fuse_attr(ino, attr), 0);
    }

    fn fail(op: &str, path: &Path, err: &FsError) -> c_int {
        let code = errno(err);
        tracing::debug!(op, path = %path.display(), error = %err, errno = code, "request failed");
        code
    }
}

impl Filesystem for UtopFuse {
    fn destroy(&mut self) {
        tracing::debug!(point = %self.dispatcher.mount_state().point().display(), "fuse destroy");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child(parent, name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.runtime.block_on(self.dispatcher.lookup(&path)) {
            Ok(attr) => self.reply_entry(&path, &attr, reply),
            Err(e) => reply.error(Self::fail("lookup", &path, &e)),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.runtime.block_on(self.dispatcher.getattr(&path)) {
            Ok(attr) => reply.attr(&self.ttl_for(&path), &self.fuse_attr(ino, &attr)),
            Err(e) => reply.error(Self::fail("getattr", &path, &e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        let changes = SetAttr {
            size,
            mtime: mtime.map(system_time),
            atime: atime.map(system_time),
            perm: mode.map(|m| m & 0o7777),
            uid,
            gid,
        };
        let result = if changes.is_empty() {
            self.runtime.block_on(self.dispatcher.getattr(&path))
        } else {
            self.runtime.block_on(self.dispatcher.setattr(&path, changes))
        };
        match result {
            Ok(attr) => reply.attr(&self.ttl_for(&path), &self.fuse_attr(ino, &attr)),
            Err(e) => reply.error(Self::fail("setattr", &path, &e)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.runtime.block_on(self.dispatcher.readlink(&path)) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(Self::fail("readlink", &path, &e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child(parent, name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.runtime.block_on(self.dispatcher.mkdir(&path, mode & !umask & 0o7777)) {
            Ok(attr) => self.reply_entry(&path, &attr, reply),
            Err(e) => reply.error(Self::fail("mkdir", &path, &e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child(parent, name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.runtime.block_on(self.dispatcher.unlink(&path)) {
            Ok(()) => {
                self.inodes.unlink(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::fail("unlink", &path, &e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child(parent, name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.runtime.block_on(self.dispatcher.rmdir(&path)) {
            Ok(()) => {
                self.inodes.unlink(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::fail("rmdir", &path, &e)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let path = match self.child(parent, link_name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.runtime.block_on(self.dispatcher.symlink(&path, target)) {
            Ok(attr) => self.reply_entry(&path, &attr, reply),
            Err(e) => reply.error(Self::fail("symlink", &path, &e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (from, to) = match (self.child(parent, name), self.child(newparent, newname)) {
            (Ok(from), Ok(to)) => (from, to),
            (Err(code), _) | (_, Err(code)) => return reply.error(code),
        };
        match self.runtime.block_on(self.dispatcher.rename(&from, &to)) {
            Ok(()) => {
                self.inodes.rename(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(Self::fail("rename", &from, &e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.runtime.block_on(self.dispatcher.open(&path, open_flags(flags))) {
            // Generated content has no stable size; bypass the page cache.
            Ok(_) if classify(&path).is_control() => {
                reply.opened(0, fuser::consts::FOPEN_DIRECT_IO)
            }
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(Self::fail("open", &path, &e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(EINVAL);
        };
        match self.runtime.block_on(self.dispatcher.read(&path, offset, size)) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(Self::fail("read", &path, &e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(EINVAL);
        };
        match self.runtime.block_on(self.dispatcher.write(&path, offset, data)) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(Self::fail("write", &path, &e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        let entries = match self.runtime.block_on(self.dispatcher.readdir(&path)) {
            Ok(entries) => entries,
            Err(e) => return reply.error(Self::fail("readdir", &path, &e)),
        };

        let parent_ino = path
            .parent()
            .and_then(|parent| self.inodes.peek(parent))
            .unwrap_or(ROOT_INO);
        let mut listing = vec![
            (ino, fuser::FileType::Directory, OsStr::new(".").to_os_string()),
            (parent_ino, fuser::FileType::Directory, OsStr::new("..").to_os_string()),
        ];
        listing.extend(entries.into_iter().map(|entry| {
            let child_ino = self.inodes.peek(&path.join(&entry.name)).unwrap_or(UNKNOWN_INO);
            (child_ino, fuse_kind(entry.kind), entry.name.into())
        }));

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (entry_ino, kind, name)) in listing.into_iter().enumerate().skip(skip) {
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match self.runtime.block_on(self.dispatcher.statfs()) {
            Ok(s) => reply.statfs(
                s.blocks, s.bfree, s.bavail, s.files, s.ffree, s.bsize, s.namelen, s.frsize,
            ),
            Err(e) => reply.error(Self::fail("statfs", Path::new(""), &e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child(parent, name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.runtime.block_on(self.dispatcher.create(&path, mode & !umask & 0o7777)) {
            Ok(attr) => {
                let ino = self.inodes.lookup(&path);
                tracing::trace!(path = %path.display(), ino, flags, "created");
                reply.created(&self.ttl_for(&path), &self.fuse_attr(ino, &attr), 0, 0, 0);
            }
            Err(e) => reply.error(Self::fail("create", &path, &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(errno(&FsError::not_found("a")), libc::ENOENT);
        assert_eq!(errno(&FsError::read_only_violation(".utopfs/version")), libc::EROFS);
        assert_eq!(errno(&FsError::ReadOnly), libc::EROFS);
        assert_eq!(errno(&FsError::directory_not_empty("d")), libc::ENOTEMPTY);
        assert_eq!(errno(&FsError::NotMounted), libc::ENOTCONN);
        assert_eq!(errno(&FsError::Cancelled), libc::EINTR);
        assert_eq!(errno(&FsError::FileTooLarge("a.txt".into())), libc::EFBIG);
        assert_eq!(
            errno(&FsError::Io(io::Error::from_raw_os_error(libc::ENOSPC))),
            libc::ENOSPC
        );
        assert_eq!(errno(&FsError::other("engine")), libc::EIO);
    }

    #[test]
    fn test_open_flags() {
        let ro = open_flags(libc::O_RDONLY);
        assert!(ro.read && !ro.mutates());

        let wo = open_flags(libc::O_WRONLY);
        assert!(!wo.read && wo.write);

        let rw = open_flags(libc::O_RDWR | libc::O_APPEND);
        assert!(rw.read && rw.write && rw.append);

        assert!(open_flags(libc::O_RDONLY | libc::O_TRUNC).mutates());
    }

    #[test]
    fn test_mount_options() {
        let options = FuseOptions {
            read_only: true,
            ..FuseOptions::default()
        }
        .mount_options();
        assert!(options.contains(&MountOption::FSName("utopfs".to_string())));
        assert!(options.contains(&MountOption::RO));
        assert!(!options.contains(&MountOption::AllowOther));
    }

    #[test]
    fn test_control_paths_are_uncached() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let manager = utopfs_kernel::MountManager::new(
            Arc::new(utopfs_kernel::MemoryBackend::new()),
            Arc::new(utopfs_kernel::DetachedBridge),
            Default::default(),
        );
        let dir = tempfile::tempdir().unwrap();
        let handle = runtime.block_on(manager.mount(dir.path())).unwrap();

        let fs = UtopFuse::new(
            Arc::clone(handle.dispatcher()),
            runtime.handle().clone(),
            Duration::from_secs(1),
        );
        assert_eq!(fs.ttl_for(Path::new(".utopfs/stats")), Duration::ZERO);
        assert_eq!(fs.ttl_for(Path::new("docs")), Duration::from_secs(1));

        let attr = runtime
            .block_on(handle.dispatcher().getattr(Path::new(".utopfs/version")))
            .unwrap();
        let fuse = fs.fuse_attr(7, &attr);
        assert_eq!(fuse.ino, 7);
        assert_eq!(fuse.perm, 0o444);
        assert_eq!(fuse.kind, fuser::FileType::RegularFile);
        assert_eq!(fuse.uid, rustix::process::getuid().as_raw());
    }
}
