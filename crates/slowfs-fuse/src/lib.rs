#![forbid(unsafe_code)]
//! FUSE passthrough adapter for SlowFS.
//!
//! Kernel requests arrive via the `fuser` crate and are forwarded to a
//! backing directory. Every operation follows the same contract: sample the
//! clock before doing anything, perform the real I/O, describe what
//! happened to the [`Scheduler`], then sleep until the modeled device would
//! have finished. Reads are fully materialized and writes are issued
//! synchronously before scheduling, so the request carries the byte counts
//! actually transferred — including on failure paths.
//!
//! Operations with no safe-Rust syscall surface (mknod, the xattr family,
//! statfs) are not overridden and fall through to fuser's default replies.

mod inode;

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyCreate,
    ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request,
    TimeOrNow,
};
use inode::{InodeTable, ROOT_INO};
use slowfs_scheduler::{Clock, Request as IoRequest, Scheduler};
use slowfs_types::{ByteCount, Timestamp};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, File, FileTimes, OpenOptions, Permissions};
use std::io;
use std::os::raw::c_int;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{
    DirEntryExt, FileExt, FileTypeExt, MetadataExt, OpenOptionsExt, PermissionsExt,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;

/// TTL for cached attributes and entries. The backing tree can change
/// underneath us, so keep it short.
const ATTR_TTL: Duration = Duration::from_secs(1);

// ── Error type ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FuseError {
    #[error("invalid mountpoint: {0}")]
    InvalidMountpoint(String),
    #[error("mount I/O error: {0}")]
    Io(#[from] io::Error),
}

// ── Conversions ─────────────────────────────────────────────────────────────

fn errno(err: &io::Error) -> c_int {
    err.raw_os_error().unwrap_or(libc::EIO)
}

fn file_type_of(meta: &fs::Metadata) -> FileType {
    let ft = meta.file_type();
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_char_device() {
        FileType::CharDevice
    } else if ft.is_fifo() {
        FileType::NamedPipe
    } else if ft.is_socket() {
        FileType::Socket
    } else {
        FileType::RegularFile
    }
}

fn system_time_from(secs: i64, nanos: i64) -> SystemTime {
    let nanos = u32::try_from(nanos).unwrap_or(0);
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs.unsigned_abs(), nanos)
    } else {
        UNIX_EPOCH - Duration::new(secs.unsigned_abs(), nanos)
    }
}

/// Translate backing-store metadata into the attr the kernel sees, under
/// the inode number this mount assigned.
fn attr_from(ino: u64, meta: &fs::Metadata) -> FileAttr {
    FileAttr {
        ino,
        size: meta.len(),
        blocks: meta.blocks(),
        atime: meta.accessed().unwrap_or(UNIX_EPOCH),
        mtime: meta.modified().unwrap_or(UNIX_EPOCH),
        ctime: system_time_from(meta.ctime(), meta.ctime_nsec()),
        crtime: UNIX_EPOCH,
        kind: file_type_of(meta),
        perm: u16::try_from(meta.mode() & 0o7777).unwrap_or(0),
        nlink: u32::try_from(meta.nlink()).unwrap_or(1),
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: u32::try_from(meta.rdev()).unwrap_or(0),
        blksize: u32::try_from(meta.blksize()).unwrap_or(4096),
        flags: 0,
    }
}

fn resolve_time(t: TimeOrNow) -> SystemTime {
    match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

/// Open a backing file honoring the kernel's access mode and the flags
/// expressible through `OpenOptions`.
fn open_backing(path: &Path, flags: i32) -> io::Result<File> {
    let mut options = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => {
            options.write(true);
        }
        libc::O_RDWR => {
            options.read(true).write(true);
        }
        _ => {
            options.read(true);
        }
    }
    if flags & libc::O_APPEND != 0 {
        options.append(true);
    }
    if flags & libc::O_TRUNC != 0 {
        options.write(true).truncate(true);
    }
    options.open(path)
}

/// Read exactly `size` bytes at `offset`, stopping early only at EOF or on
/// error. Returns whatever was materialized plus the error, if any.
fn read_fully(file: &File, offset: u64, size: usize) -> (Vec<u8>, Option<io::Error>) {
    let mut buf = vec![0_u8; size];
    let mut filled = 0;
    let mut error = None;
    while filled < size {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }
    buf.truncate(filled);
    (buf, error)
}

/// Write all of `data` at `offset`. Returns the bytes actually written
/// plus the error, if any.
fn write_fully(file: &File, offset: u64, data: &[u8]) -> (usize, Option<io::Error>) {
    let mut written = 0;
    while written < data.len() {
        match file.write_at(&data[written..], offset + written as u64) {
            Ok(0) => {
                return (
                    written,
                    Some(io::Error::new(io::ErrorKind::WriteZero, "short write")),
                );
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return (written, Some(e)),
        }
    }
    (written, None)
}

// ── Mount options ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MountOptions {
    pub allow_other: bool,
    pub auto_unmount: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            allow_other: false,
            auto_unmount: true,
        }
    }
}

fn build_mount_options(options: &MountOptions) -> Vec<MountOption> {
    let mut opts = vec![
        MountOption::FSName("slowfs".to_owned()),
        MountOption::Subtype("slowfs".to_owned()),
        MountOption::DefaultPermissions,
    ];
    if options.allow_other {
        opts.push(MountOption::AllowOther);
    }
    if options.auto_unmount {
        opts.push(MountOption::AutoUnmount);
    }
    opts
}

// ── Passthrough filesystem ──────────────────────────────────────────────────

#[derive(Debug)]
struct OpenFile {
    file: File,
    path: PathBuf,
}

/// A filesystem whose operations take as long as the [`Scheduler`] says.
///
/// Forwards everything to a backing directory; paths into the backing store
/// double as the identity keys the scheduler tracks sequentiality and
/// dirty bytes under.
pub struct SlowFuse {
    scheduler: Arc<Scheduler>,
    clock: Clock,
    inodes: InodeTable,
    handles: HashMap<u64, OpenFile>,
    next_fh: u64,
}

impl SlowFuse {
    /// Create a passthrough over `backing_dir` paced by `scheduler`.
    #[must_use]
    pub fn new(backing_dir: impl Into<PathBuf>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            clock: Clock::new(),
            inodes: InodeTable::new(backing_dir.into()),
            handles: HashMap::new(),
            next_fh: 1,
        }
    }

    /// Ask the scheduler how long the operation should have taken, then
    /// sleep out whatever real time has not already passed.
    fn pace(&self, req: &IoRequest) {
        let delay = self.scheduler.schedule(req);
        let elapsed = self.clock.now().saturating_duration_since(req.timestamp);
        if let Some(remaining) = delay.checked_sub(elapsed) {
            if !remaining.is_zero() {
                thread::sleep(remaining);
            }
        }
    }

    fn pace_metadata(&self, start: Timestamp) {
        self.pace(&IoRequest::metadata(start));
    }

    fn path_of(&self, ino: u64) -> Option<PathBuf> {
        self.inodes.path(ino).map(Path::to_path_buf)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        self.inodes.path(parent).map(|dir| dir.join(name))
    }

    /// Stat `path` and intern it, producing the entry reply payload.
    fn lookup_entry(&mut self, path: PathBuf) -> io::Result<FileAttr> {
        let meta = fs::symlink_metadata(&path)?;
        let ino = self.inodes.intern(path);
        Ok(attr_from(ino, &meta))
    }

    fn open_handle(&mut self, file: File, path: PathBuf) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, OpenFile { file, path });
        fh
    }
}

impl Filesystem for SlowFuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        Ok(())
    }

    fn destroy(&mut self) {}

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let start = self.clock.now();
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = self.lookup_entry(path);
        self.pace_metadata(start);
        match result {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => {
                if errno(&e) != libc::ENOENT {
                    warn!(parent, ?name, error = %e, "lookup failed");
                }
                reply.error(errno(&e));
            }
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let start = self.clock.now();
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = fs::symlink_metadata(&path);
        self.pace_metadata(start);
        match result {
            Ok(meta) => reply.attr(&ATTR_TTL, &attr_from(ino, &meta)),
            Err(e) => {
                warn!(ino, error = %e, "getattr failed");
                reply.error(errno(&e));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
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
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let start = self.clock.now();
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        let result = (|| -> io::Result<fs::Metadata> {
            if let Some(mode) = mode {
                fs::set_permissions(&path, Permissions::from_mode(mode & 0o7777))?;
            }
            if uid.is_some() || gid.is_some() {
                std::os::unix::fs::chown(&path, uid, gid)?;
            }
            if let Some(size) = size {
                match fh.and_then(|fh| self.handles.get(&fh)) {
                    Some(handle) => handle.file.set_len(size)?,
                    None => OpenOptions::new().write(true).open(&path)?.set_len(size)?,
                }
            }
            if atime.is_some() || mtime.is_some() {
                let mut times = FileTimes::new();
                if let Some(atime) = atime {
                    times = times.set_accessed(resolve_time(atime));
                }
                if let Some(mtime) = mtime {
                    times = times.set_modified(resolve_time(mtime));
                }
                File::open(&path)?.set_times(times)?;
            }
            fs::symlink_metadata(&path)
        })();

        self.pace_metadata(start);
        match result {
            Ok(meta) => reply.attr(&ATTR_TTL, &attr_from(ino, &meta)),
            Err(e) => {
                warn!(ino, error = %e, "setattr failed");
                reply.error(errno(&e));
            }
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let start = self.clock.now();
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = fs::read_link(&path);
        self.pace_metadata(start);
        match result {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => {
                warn!(ino, error = %e, "readlink failed");
                reply.error(errno(&e));
            }
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
        let start = self.clock.now();
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = (|| -> io::Result<()> {
            fs::create_dir(&path)?;
            fs::set_permissions(&path, Permissions::from_mode(mode & !umask & 0o7777))
        })()
        .and_then(|()| self.lookup_entry(path));
        self.pace_metadata(start);
        match result {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => {
                warn!(parent, ?name, error = %e, "mkdir failed");
                reply.error(errno(&e));
            }
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let start = self.clock.now();
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = fs::remove_file(&path);
        if result.is_ok() {
            self.inodes.unlink(&path);
        }
        self.pace_metadata(start);
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                warn!(parent, ?name, error = %e, "unlink failed");
                reply.error(errno(&e));
            }
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let start = self.clock.now();
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = fs::remove_dir(&path);
        if result.is_ok() {
            self.inodes.unlink(&path);
        }
        self.pace_metadata(start);
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&e)),
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
        let start = self.clock.now();
        let Some(path) = self.child_path(parent, link_name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = std::os::unix::fs::symlink(target, &path)
            .and_then(|()| self.lookup_entry(path));
        self.pace_metadata(start);
        match result {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => {
                warn!(parent, ?link_name, error = %e, "symlink failed");
                reply.error(errno(&e));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
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
        let start = self.clock.now();
        let (Some(old), Some(new)) = (
            self.child_path(parent, name),
            self.child_path(newparent, newname),
        ) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = fs::rename(&old, &new);
        if result.is_ok() {
            self.inodes.rename(&old, &new);
        }
        self.pace_metadata(start);
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                warn!(parent, ?name, ?newname, error = %e, "rename failed");
                reply.error(errno(&e));
            }
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let start = self.clock.now();
        let (Some(existing), Some(new)) =
            (self.path_of(ino), self.child_path(newparent, newname))
        else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = fs::hard_link(&existing, &new).and_then(|()| self.lookup_entry(new));
        self.pace_metadata(start);
        match result {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => {
                warn!(ino, ?newname, error = %e, "link failed");
                reply.error(errno(&e));
            }
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let start = self.clock.now();
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = open_backing(&path, flags);
        self.pace_metadata(start);
        match result {
            Ok(file) => {
                let fh = self.open_handle(file, path);
                reply.opened(fh, 0);
            }
            Err(e) => {
                warn!(ino, flags, error = %e, "open failed");
                reply.error(errno(&e));
            }
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
        let start = self.clock.now();
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = (|| -> io::Result<File> {
            let mut options = OpenOptions::new();
            options
                .read((flags & libc::O_ACCMODE) != libc::O_WRONLY)
                .write(true);
            if flags & libc::O_EXCL != 0 {
                options.create_new(true);
            } else {
                options.create(true);
            }
            if flags & libc::O_TRUNC != 0 {
                options.truncate(true);
            }
            options.mode(mode & !umask & 0o7777);
            options.open(&path)
        })();
        let result = result.and_then(|file| {
            let attr = self.lookup_entry(path.clone())?;
            Ok((file, attr))
        });
        self.pace_metadata(start);
        match result {
            Ok((file, attr)) => {
                let fh = self.open_handle(file, path);
                reply.created(&ATTR_TTL, &attr, 0, fh, 0);
            }
            Err(e) => {
                warn!(parent, ?name, error = %e, "create failed");
                reply.error(errno(&e));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let start = self.clock.now();
        let Some(handle) = self.handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        let offset = u64::try_from(offset).unwrap_or(0);
        // Materialize the bytes now; the scheduler is told how many were
        // actually transferred, even if the read failed partway.
        let (data, error) = read_fully(&handle.file, offset, size as usize);
        let path = handle.path.clone();
        self.pace(&IoRequest::read(
            start,
            path,
            ByteCount(offset),
            ByteCount(data.len() as u64),
        ));
        match error {
            None => reply.data(&data),
            Some(e) => {
                warn!(ino, offset, size, error = %e, "read failed");
                reply.error(errno(&e));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let start = self.clock.now();
        let Some(handle) = self.handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        let offset = u64::try_from(offset).unwrap_or(0);
        let (written, error) = write_fully(&handle.file, offset, data);
        let path = handle.path.clone();
        self.pace(&IoRequest::write(
            start,
            path,
            ByteCount(offset),
            ByteCount(written as u64),
        ));
        match error {
            None => reply.written(u32::try_from(written).unwrap_or(u32::MAX)),
            Some(e) => {
                warn!(ino, offset, error = %e, "write failed");
                reply.error(errno(&e));
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let start = self.clock.now();
        let Some(handle) = self.handles.remove(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        let path = handle.path.clone();
        drop(handle);
        self.pace(&IoRequest::close(start, path));
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        let start = self.clock.now();
        let Some(handle) = self.handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        let result = if datasync {
            handle.file.sync_data()
        } else {
            handle.file.sync_all()
        };
        let path = handle.path.clone();
        self.pace(&IoRequest::fsync(start, path));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                warn!(ino, error = %e, "fsync failed");
                reply.error(errno(&e));
            }
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let start = self.clock.now();
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        // Directory handles are stateless; just confirm the directory is
        // readable and charge the metadata op.
        let result = fs::read_dir(&path).map(|_| ());
        self.pace_metadata(start);
        match result {
            Ok(()) => reply.opened(0, 0),
            Err(e) => {
                warn!(ino, error = %e, "opendir failed");
                reply.error(errno(&e));
            }
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
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        let entries = match fs::read_dir(&path) {
            Ok(iter) => iter,
            Err(e) => {
                warn!(ino, error = %e, "readdir failed");
                reply.error(errno(&e));
                return;
            }
        };

        // "." and ".." first, then backing entries with their backing inode
        // numbers (only used for display; lookup assigns the real ones).
        let mut listing: Vec<(u64, FileType, std::ffi::OsString)> = vec![
            (ino, FileType::Directory, ".".into()),
            (ino, FileType::Directory, "..".into()),
        ];
        for entry in entries.flatten() {
            let kind = entry
                .file_type()
                .map_or(FileType::RegularFile, |ft| {
                    if ft.is_dir() {
                        FileType::Directory
                    } else if ft.is_symlink() {
                        FileType::Symlink
                    } else {
                        FileType::RegularFile
                    }
                });
            listing.push((entry.ino(), kind, entry.file_name()));
        }

        let offset = usize::try_from(offset).unwrap_or(0);
        for (i, (entry_ino, kind, name)) in listing.into_iter().enumerate().skip(offset) {
            let next_offset = i64::try_from(i + 1).unwrap_or(i64::MAX);
            if reply.add(entry_ino, next_offset, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, _mask: i32, reply: ReplyEmpty) {
        let start = self.clock.now();
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        // Permission bits are enforced by the kernel (default_permissions);
        // existence is all that is checked here.
        let result = fs::symlink_metadata(&path).map(|_| ());
        self.pace_metadata(start);
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fallocate(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        length: i64,
        mode: i32,
        reply: ReplyEmpty,
    ) {
        let start = self.clock.now();
        let Some(handle) = self.handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        // Only plain preallocation is supported: extend the file so the
        // requested range exists. Punching and collapsing are not
        // expressible through std.
        if mode != 0 {
            reply.error(libc::EOPNOTSUPP);
            return;
        }
        let offset = u64::try_from(offset).unwrap_or(0);
        let length = u64::try_from(length).unwrap_or(0);
        let result = (|| -> io::Result<()> {
            let end = offset.saturating_add(length);
            if handle.file.metadata()?.len() < end {
                handle.file.set_len(end)?;
            }
            Ok(())
        })();
        let path = handle.path.clone();
        self.pace(&IoRequest::allocate(
            start,
            path,
            ByteCount(offset),
            ByteCount(length),
        ));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                warn!(ino, offset, length, error = %e, "fallocate failed");
                reply.error(errno(&e));
            }
        }
    }
}

// ── Mount entrypoints ───────────────────────────────────────────────────────

fn check_mountpoint(mountpoint: &Path) -> Result<(), FuseError> {
    if mountpoint.as_os_str().is_empty() {
        return Err(FuseError::InvalidMountpoint(
            "mountpoint cannot be empty".to_owned(),
        ));
    }
    Ok(())
}

/// Mount a slowed passthrough of `backing_dir` at `mountpoint` (blocking).
///
/// Blocks until the filesystem is unmounted.
pub fn mount(
    backing_dir: impl Into<PathBuf>,
    scheduler: Arc<Scheduler>,
    mountpoint: impl AsRef<Path>,
    options: &MountOptions,
) -> Result<(), FuseError> {
    let mountpoint = mountpoint.as_ref();
    check_mountpoint(mountpoint)?;
    let fs = SlowFuse::new(backing_dir, scheduler);
    fuser::mount2(fs, mountpoint, &build_mount_options(options))?;
    Ok(())
}

/// Mount in the background, returning a session handle that unmounts on
/// drop.
pub fn mount_background(
    backing_dir: impl Into<PathBuf>,
    scheduler: Arc<Scheduler>,
    mountpoint: impl AsRef<Path>,
    options: &MountOptions,
) -> Result<fuser::BackgroundSession, FuseError> {
    let mountpoint = mountpoint.as_ref();
    check_mountpoint(mountpoint)?;
    let fs = SlowFuse::new(backing_dir, scheduler);
    let session = fuser::spawn_mount2(fs, mountpoint, &build_mount_options(options))?;
    Ok(session)
}
