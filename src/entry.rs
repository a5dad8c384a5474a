//! The in-memory inode: [`Entry`] plus the attributes and lock discipline
//! described in spec §3.1/§4.1.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::entry_set::EntrySet;

pub type FileId = u64;

/// Reserved for the root directory, per §6.4.
pub const ROOT_FILE_ID: FileId = 1;
/// Reserved as "no such inode".
pub const INVALID_FILE_ID: FileId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
    /// Transient sentinel set by the destruction protocol (§4.8). No entry
    /// with this kind is reachable from any [`EntrySet`] — only already-held
    /// handles or locks can still see one.
    Dead,
}

impl Kind {
    pub fn is_directory(self) -> bool {
        matches!(self, Kind::Directory)
    }
}

/// Second+nanosecond timestamp, matching the POSIX `timespec` shape used by
/// `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            secs: since_epoch.as_secs() as i64,
            nanos: since_epoch.subsec_nanos(),
        }
    }

    pub const ZERO: Timestamp = Timestamp { secs: 0, nanos: 0 };
}

/// (major, minor) pair for device-special inodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId {
    pub major: u32,
    pub minor: u32,
}

/// POSIX stat structure materialized from an [`Entry`]; see §4.5.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub file_id: FileId,
    pub kind: Kind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u32,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
    pub rdev: Option<DeviceId>,
    pub blksize: u32,
    pub blocks: u64,
}

/// Everything about an inode that can change, protected by the entry's own
/// reader-writer lock (§3.1: "a reader-writer lock protecting *all* the
/// above").
pub struct EntryState {
    pub kind: Kind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
    pub size: u64,
    pub link_count: u32,
    pub open_count: u32,
    pub deletion_in_progress: bool,
    pub children: Option<EntrySet>,
    pub xattrs: HashMap<Vec<u8>, Vec<u8>>,
    pub app_data: Option<Box<dyn std::any::Any + Send + Sync>>,
    pub symlink_target: Option<Vec<u8>>,
    pub dev: Option<DeviceId>,
    /// Directories only: count of children spliced out of `children` by
    /// unlink/rmdir/rename-replace while still referenced (`open_count > 0`),
    /// so `rmdir`'s emptiness check still sees them (§8: a tombstoned-but-
    /// open child keeps the directory non-empty).
    pub tombstone_count: u32,
    /// Set on a detached-but-still-referenced entry to the directory whose
    /// `tombstone_count` is tracking it; decremented there once this entry
    /// is actually destroyed.
    pub tombstone_parent: Option<std::sync::Arc<Entry>>,
}

impl EntryState {
    /// §8 invariant 2: a reachable entry always has `link_count > 0` or
    /// `open_count > 0`. Destruction must run before this can go false.
    pub fn is_destroyable(&self) -> bool {
        self.link_count == 0 && self.open_count == 0
    }
}

/// An in-memory inode. `file_id` is immutable for the entry's lifetime;
/// everything else lives behind `state`.
pub struct Entry {
    file_id: FileId,
    state: RwLock<EntryState>,
}

pub type EntryReadGuard<'a> = RwLockReadGuard<'a, EntryState>;
pub type EntryWriteGuard<'a> = RwLockWriteGuard<'a, EntryState>;

impl Entry {
    fn new(file_id: FileId, kind: Kind, mode: u32, uid: u32, gid: u32, link_count: u32) -> Self {
        let now = Timestamp::now();
        Entry {
            file_id,
            state: RwLock::new(EntryState {
                kind,
                mode,
                uid,
                gid,
                atime: now,
                mtime: now,
                ctime: now,
                size: 0,
                link_count,
                open_count: 0,
                deletion_in_progress: false,
                children: None,
                xattrs: HashMap::new(),
                app_data: None,
                symlink_target: None,
                dev: None,
                tombstone_count: 0,
                tombstone_parent: None,
            }),
        }
    }

    pub fn new_file(file_id: FileId, mode: u32, uid: u32, gid: u32) -> Self {
        Self::new(file_id, Kind::File, mode, uid, gid, 1)
    }

    pub fn new_directory(file_id: FileId, mode: u32, uid: u32, gid: u32) -> Self {
        let entry = Self::new(file_id, Kind::Directory, mode, uid, gid, 2);
        entry.state.write().children = Some(EntrySet::new());
        entry
    }

    pub fn new_symlink(file_id: FileId, mode: u32, uid: u32, gid: u32, target: Vec<u8>) -> Self {
        let entry = Self::new(file_id, Kind::Symlink, mode, uid, gid, 1);
        entry.state.write().symlink_target = Some(target);
        entry
    }

    pub fn new_special(
        file_id: FileId,
        kind: Kind,
        mode: u32,
        uid: u32,
        gid: u32,
        dev: Option<DeviceId>,
    ) -> Self {
        debug_assert!(!matches!(kind, Kind::Directory | Kind::Symlink | Kind::Dead));
        let entry = Self::new(file_id, kind, mode, uid, gid, 1);
        entry.state.write().dev = dev;
        entry
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn read(&self) -> EntryReadGuard<'_> {
        self.state.read()
    }

    pub fn write(&self) -> EntryWriteGuard<'_> {
        self.state.write()
    }

    pub fn kind(&self) -> Kind {
        self.state.read().kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind().is_directory()
    }

    /// Whether new lookups should treat this entry as absent: either it has
    /// been tombstoned, or it has fully transitioned to `Dead`.
    pub fn is_visible(&self) -> bool {
        let state = self.state.read();
        !state.deletion_in_progress && !matches!(state.kind, Kind::Dead)
    }

    pub fn stat(&self) -> Stat {
        let state = self.state.read();
        Stat {
            file_id: self.file_id,
            kind: state.kind,
            mode: state.mode,
            uid: state.uid,
            gid: state.gid,
            size: state.size,
            nlink: state.link_count,
            atime: state.atime,
            mtime: state.mtime,
            ctime: state.ctime,
            rdev: state.dev,
            blksize: 4096,
            blocks: state.size.div_ceil(512),
        }
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Entry")
            .field("file_id", &self.file_id)
            .field("kind", &state.kind)
            .field("link_count", &state.link_count)
            .field("open_count", &state.open_count)
            .finish()
    }
}

/// POSIX permission check: does `(uid, gid)` have `mask` (a combination of
/// the `0o4`/`0o2`/`0o1` read/write/execute bits) against this mode/owner?
/// Root always passes. Shared by the path walker's search-permission check
/// and by `access`.
pub fn check_permission(mode: u32, owner_uid: u32, owner_gid: u32, uid: u32, gid: u32, mask: u32) -> bool {
    if uid == 0 {
        return true;
    }
    let shift = if uid == owner_uid {
        6
    } else if gid == owner_gid {
        3
    } else {
        0
    };
    let allowed = (mode >> shift) & 0o7;
    (allowed & mask) == mask
}
