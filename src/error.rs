//! Error taxonomy and the POSIX errno projection used at the API boundary.

use std::fmt;

/// Everything that can go wrong inside the core, independent of how a
/// particular embedder chooses to report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// directory entry not found
    NotFound,
    /// operation expecting a directory was given something that isn't one
    NotDirectory,
    /// operation expecting a non-directory was given a directory
    IsDirectory,
    /// access, chmod, chown, utime: caller lacks the required permission
    PermissionDenied,
    /// operation not permitted for this caller (distinct from a plain
    /// permission check: e.g. chown by a non-root caller)
    NotPermitted,
    /// destination of create/mkdir/mknod/link/symlink/rename already exists
    Exists,
    /// rmdir/rename on a non-empty directory
    NotEmpty,
    /// allocator exhaustion (inode numbers, xattr storage, ...)
    OutOfMemory,
    /// path component exceeds `FSKIT_FILESYSTEM_NAMEMAX`, or path too long
    NameTooLong,
    /// malformed request (bad flags, empty name, name containing '/', ...)
    InvalidArgument,
    /// file system does not support this operation (e.g. hard link across
    /// directories)
    Unsupported,
    /// requested extended attribute does not exist
    NoAttribute,
    /// lock discipline or allocator invariant violated — a bug, not a
    /// reachable user error
    Deadlock,
    /// I/O failure surfaced by a route callback's backing store
    Io,
    /// route callback returned an application-defined error
    Callback(i32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such file or directory"),
            Self::NotDirectory => write!(f, "not a directory"),
            Self::IsDirectory => write!(f, "is a directory"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::NotPermitted => write!(f, "operation not permitted"),
            Self::Exists => write!(f, "file exists"),
            Self::NotEmpty => write!(f, "directory not empty"),
            Self::OutOfMemory => write!(f, "cannot allocate memory"),
            Self::NameTooLong => write!(f, "file name too long"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Unsupported => write!(f, "operation not supported"),
            Self::NoAttribute => write!(f, "no such attribute"),
            Self::Deadlock => write!(f, "resource deadlock avoided"),
            Self::Io => write!(f, "I/O error"),
            Self::Callback(rc) => write!(f, "route callback returned {rc}"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Project onto the negative-errno convention a kernel-bridge adapter
    /// would hand back to the kernel.
    pub fn to_errno(self) -> i32 {
        let errno = match self {
            Self::NotFound => libc_errno::ENOENT,
            Self::NotDirectory => libc_errno::ENOTDIR,
            Self::IsDirectory => libc_errno::EISDIR,
            Self::PermissionDenied => libc_errno::EACCES,
            Self::NotPermitted => libc_errno::EPERM,
            Self::Exists => libc_errno::EEXIST,
            Self::NotEmpty => libc_errno::ENOTEMPTY,
            Self::OutOfMemory => libc_errno::ENOMEM,
            Self::NameTooLong => libc_errno::ENAMETOOLONG,
            Self::InvalidArgument => libc_errno::EINVAL,
            Self::Unsupported => libc_errno::EINVAL,
            Self::NoAttribute => libc_errno::ENODATA,
            Self::Deadlock => libc_errno::EDEADLK,
            Self::Io => libc_errno::EIO,
            Self::Callback(rc) => return -rc.abs(),
        };
        -errno
    }
}

/// The small slice of libc's errno namespace this crate needs, kept local so
/// the crate has no direct `libc` dependency just for a handful of constants.
mod libc_errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const ENOMEM: i32 = 12;
    pub const EACCES: i32 = 13;
    pub const EEXIST: i32 = 17;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ENAMETOOLONG: i32 = 36;
    pub const ENOTEMPTY: i32 = 39;
    pub const ENODATA: i32 = 61;
    pub const EDEADLK: i32 = 35;
}

pub type Result<T> = std::result::Result<T, Error>;
