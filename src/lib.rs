//! An in-memory, POSIX-semantics filesystem core.
//!
//! Consumers embed this library to build a tree of directories, regular
//! files, symlinks, device nodes, sockets, and FIFOs entirely in RAM, and
//! attach application state to inodes and handles through *routes* —
//! pattern-matched callbacks invoked at each operation. A kernel-bridge
//! driver (out of scope for this crate) exposes the tree through an actual
//! kernel filesystem interface; this crate only implements the core tree,
//! lock discipline, handle lifecycle, and operation verbs it sits on top of.

pub mod config;
mod core;
mod destroy;
pub mod entry;
pub mod entry_set;
pub mod error;
pub mod handle;
mod ops;
pub mod route;
pub mod walker;

pub use crate::core::{library_init, library_shutdown, AppState, Core, StatVfs};
pub use crate::error::{Error, Result};

/// §6.4: fixed magic number reported as `st_dev`/`f_fsid`.
pub const FSKIT_FILESYSTEM_TYPE: u64 = 0x1988_0119;
/// §6.4: maximum path component length.
pub const FSKIT_FILESYSTEM_NAMEMAX: usize = 255;

pub use ops::attr::{access, chmod, chown, stat, utime, AccessMask};
pub use ops::create_open::{close, create, open, read, write};
pub use ops::dir::{closedir, mkdir, opendir, readdir, rewinddir, rmdir, seekdir, telldir};
pub use ops::mknod::mknod;
pub use ops::rename::rename;
pub use ops::symlink::{readlink, symlink};
pub use ops::trunc::{ftruncate, truncate};
pub use ops::xattr::{getxattr, listxattr, removexattr, setxattr, XattrFlags};
