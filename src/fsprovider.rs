//! The FS provider: the injection point for every real IO call the
//! graph makes. `spec.md` §4.5 treats `lstat`/`readdir`/`readlink`/
//! `realpath` as external collaborators; this module defines the
//! contract the core needs from them and ships a default
//! OS-backed implementation, mirroring the teacher's `Vfs` trait
//! (`examples/RMamonts-nfs-mamont/src/vfs.rs`) down to the "one
//! `async_trait`, sync mirror methods with a `Sync` suffix" shape.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::bits;

/// Inode type as reported by a directory entry or a stat call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Unknown,
    Fifo,
    CharDevice,
    Directory,
    BlockDevice,
    Regular,
    Symlink,
    Socket,
}

impl FileKind {
    pub fn ifmt(self) -> u16 {
        match self {
            FileKind::Unknown => bits::UNKNOWN,
            FileKind::Fifo => bits::IFIFO,
            FileKind::CharDevice => bits::IFCHR,
            FileKind::Directory => bits::IFDIR,
            FileKind::BlockDevice => bits::IFBLK,
            FileKind::Regular => bits::IFREG,
            FileKind::Symlink => bits::IFLNK,
            FileKind::Socket => bits::IFSOCK,
        }
    }

    /// Decodes a real POSIX `st_mode` (where the type lives in the top
    /// nibbles under `S_IFMT == 0o170000`) into a [`FileKind`]. This is
    /// a different bit layout from [`bits::TypeState`]'s packed nibble
    /// and must not be confused with it.
    pub fn from_mode(mode: u32) -> Self {
        const S_IFMT: u32 = 0o170000;
        const S_IFIFO: u32 = 0o010000;
        const S_IFCHR: u32 = 0o020000;
        const S_IFDIR: u32 = 0o040000;
        const S_IFBLK: u32 = 0o060000;
        const S_IFREG: u32 = 0o100000;
        const S_IFLNK: u32 = 0o120000;
        const S_IFSOCK: u32 = 0o140000;
        match mode & S_IFMT {
            S_IFIFO => FileKind::Fifo,
            S_IFCHR => FileKind::CharDevice,
            S_IFDIR => FileKind::Directory,
            S_IFBLK => FileKind::BlockDevice,
            S_IFREG => FileKind::Regular,
            S_IFLNK => FileKind::Symlink,
            S_IFSOCK => FileKind::Socket,
            _ => FileKind::Unknown,
        }
    }

    #[cfg(unix)]
    pub fn from_std(ft: std::fs::FileType) -> Self {
        use std::os::unix::fs::FileTypeExt;
        if ft.is_dir() {
            FileKind::Directory
        } else if ft.is_symlink() {
            FileKind::Symlink
        } else if ft.is_file() {
            FileKind::Regular
        } else if ft.is_fifo() {
            FileKind::Fifo
        } else if ft.is_socket() {
            FileKind::Socket
        } else if ft.is_char_device() {
            FileKind::CharDevice
        } else if ft.is_block_device() {
            FileKind::BlockDevice
        } else {
            FileKind::Unknown
        }
    }

    #[cfg(not(unix))]
    pub fn from_std(ft: std::fs::FileType) -> Self {
        if ft.is_dir() {
            FileKind::Directory
        } else if ft.is_symlink() {
            FileKind::Symlink
        } else if ft.is_file() {
            FileKind::Regular
        } else {
            FileKind::Unknown
        }
    }
}

/// One entry returned by the entry-type `readdir` call.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

/// Stat fields a successful `lstat` populates on a node. Timestamps
/// carry both the ms-since-epoch integer and the `SystemTime` a
/// caller can format as a calendar / broken-down time (`spec.md`
/// §3.1 "stat fields").
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub dev: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub blksize: i64,
    pub ino: u64,
    pub size: u64,
    pub blocks: i64,
    pub atime_ms: i64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
    pub birthtime_ms: i64,
    pub atime: std::time::SystemTime,
    pub mtime: std::time::SystemTime,
    pub ctime: std::time::SystemTime,
    pub birthtime: std::time::SystemTime,
}

/// Coarse classification of an FS-provider error, used to decide
/// which state bits an operation's failure should flip (`spec.md`
/// §7). Anything that doesn't match a named variant is `Other` and
/// leaves node state untouched beyond what each operation specifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorKind {
    NotFound,
    NotADirectory,
    PermissionDenied,
    InvalidInput,
    Other,
}

impl FsErrorKind {
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => FsErrorKind::PermissionDenied,
            io::ErrorKind::InvalidInput => FsErrorKind::InvalidInput,
            _ => {
                #[cfg(unix)]
                {
                    if err.raw_os_error() == Some(libc_enotdir()) {
                        return FsErrorKind::NotADirectory;
                    }
                }
                FsErrorKind::Other
            }
        }
    }
}

#[cfg(unix)]
fn libc_enotdir() -> i32 {
    20 // ENOTDIR is errno 20 on Linux and Darwin alike.
}

/// The injection point for all filesystem IO (`spec.md` §4.5). Any
/// member a custom provider omits falls back to the default OS-backed
/// implementation ([`OsProvider`]); test suites swap this trait to
/// inject faults and latency.
#[async_trait]
pub trait FsProvider: Send + Sync {
    fn lstat_sync(&self, path: &Path) -> io::Result<Stat>;
    fn readdir_sync(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
    fn readlink_sync(&self, path: &Path) -> io::Result<PathBuf>;
    fn realpath_sync(&self, path: &Path) -> io::Result<PathBuf>;

    async fn lstat(&self, path: &Path) -> io::Result<Stat>;
    async fn readdir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
    async fn readlink(&self, path: &Path) -> io::Result<PathBuf>;
    async fn realpath(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Default provider: every call goes straight to the host OS, sync
/// calls via `std::fs`, async calls via `tokio::fs` (spawned onto the
/// blocking pool, since none of these syscalls are natively async).
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProvider;

fn stat_from_metadata(meta: std::fs::Metadata) -> Stat {
    let to_ms = |t: io::Result<std::time::SystemTime>| -> (i64, std::time::SystemTime) {
        let st = t.unwrap_or(std::time::UNIX_EPOCH);
        let ms = st
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        (ms, st)
    };
    let (atime_ms, atime) = to_ms(meta.accessed());
    let (mtime_ms, mtime) = to_ms(meta.modified());
    let (ctime_ms, ctime) = to_ms(meta.modified());
    let (birthtime_ms, birthtime) = to_ms(meta.created());

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Stat {
            dev: meta.dev(),
            mode: meta.mode(),
            nlink: meta.nlink(),
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev(),
            blksize: meta.blksize() as i64,
            ino: meta.ino(),
            size: meta.size(),
            blocks: meta.blocks() as i64,
            atime_ms,
            mtime_ms,
            ctime_ms,
            birthtime_ms,
            atime,
            mtime,
            ctime,
            birthtime,
        }
    }
    #[cfg(not(unix))]
    {
        Stat {
            dev: 0,
            mode: if meta.is_dir() { bits::IFDIR as u32 } else { bits::IFREG as u32 },
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 0,
            ino: 0,
            size: meta.len(),
            blocks: 0,
            atime_ms,
            mtime_ms,
            ctime_ms,
            birthtime_ms,
            atime,
            mtime,
            ctime,
            birthtime,
        }
    }
}

#[async_trait]
impl FsProvider for OsProvider {
    fn lstat_sync(&self, path: &Path) -> io::Result<Stat> {
        std::fs::symlink_metadata(path).map(stat_from_metadata)
    }

    fn readdir_sync(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let kind = FileKind::from_std(entry.file_type()?);
            out.push(DirEntry { name: entry.file_name().to_string_lossy().into_owned(), kind });
        }
        Ok(out)
    }

    fn readlink_sync(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }

    fn realpath_sync(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }

    async fn lstat(&self, path: &Path) -> io::Result<Stat> {
        tokio::fs::symlink_metadata(path).await.map(stat_from_metadata)
    }

    async fn readdir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        let mut rd = tokio::fs::read_dir(path).await?;
        while let Some(entry) = rd.next_entry().await? {
            let kind = FileKind::from_std(entry.file_type().await?);
            out.push(DirEntry { name: entry.file_name().to_string_lossy().into_owned(), kind });
        }
        Ok(out)
    }

    async fn readlink(&self, path: &Path) -> io::Result<PathBuf> {
        tokio::fs::read_link(path).await
    }

    async fn realpath(&self, path: &Path) -> io::Result<PathBuf> {
        tokio::fs::canonicalize(path).await
    }
}
