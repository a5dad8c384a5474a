//! §3.2: the root directory, the inode-number allocator, the file counter,
//! and the route table, bundled into the single value an embedder owns.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;
use parking_lot::{Mutex, RwLock};

use crate::config::CoreConfig;
use crate::entry::{Entry, FileId, ROOT_FILE_ID};
use crate::error::Result;
use crate::route::RouteTable;
use crate::walker::{self, LockMode, StepHook};

/// Opaque application state, attached to the `Core` at construction and
/// handed back unchanged at shutdown (§6.1: `core_init`/`core_destroy`).
pub type AppState = Box<dyn std::any::Any + Send + Sync>;

struct AllocState {
    live: BTreeSet<FileId>,
}

/// §6.4's `statvfs` shape, materialized on demand.
#[derive(Debug, Clone, Copy)]
pub struct StatVfs {
    pub f_fsid: u64,
    pub f_namemax: u64,
    pub f_files: u64,
    pub f_bsize: u64,
    pub f_blocks: u64,
    pub f_bfree: u64,
}

/// The top-level value an embedder constructs and holds for the lifetime of
/// the in-memory filesystem.
pub struct Core {
    root: Arc<Entry>,
    allocator: Box<dyn crate::config::InodeAllocator>,
    alloc_state: Mutex<AllocState>,
    file_count: AtomicU64,
    routes: RwLock<RouteTable>,
    app_state: Mutex<Option<AppState>>,
    name_max: usize,
}

impl Core {
    /// `core_init`: construct a fresh, empty tree (just the root directory)
    /// from `config`, with no application state attached yet.
    pub fn new(config: CoreConfig) -> Self {
        let root = Arc::new(Entry::new_directory(
            ROOT_FILE_ID,
            config.root_mode,
            config.root_uid,
            config.root_gid,
        ));
        let mut live = BTreeSet::new();
        live.insert(ROOT_FILE_ID);
        Core {
            root,
            allocator: config.inode_allocator,
            alloc_state: Mutex::new(AllocState { live }),
            file_count: AtomicU64::new(1),
            routes: RwLock::new(RouteTable::new()),
            app_state: Mutex::new(None),
            name_max: config.name_max,
        }
    }

    /// `core_init` with application state supplied up front.
    pub fn with_app_state(config: CoreConfig, app_state: AppState) -> Self {
        let core = Self::new(config);
        *core.app_state.lock() = Some(app_state);
        core
    }

    pub fn root(&self) -> &Arc<Entry> {
        &self.root
    }

    pub fn name_max(&self) -> usize {
        self.name_max
    }

    pub fn routes(&self) -> &RwLock<RouteTable> {
        &self.routes
    }

    pub fn app_state(&self) -> parking_lot::MutexGuard<'_, Option<AppState>> {
        self.app_state.lock()
    }

    pub fn set_app_state(&self, state: AppState) {
        *self.app_state.lock() = Some(state);
    }

    pub fn file_count(&self) -> u64 {
        self.file_count.load(Ordering::Relaxed)
    }

    pub fn statvfs(&self) -> StatVfs {
        StatVfs {
            f_fsid: crate::FSKIT_FILESYSTEM_TYPE,
            f_namemax: self.name_max as u64,
            f_files: self.file_count(),
            f_bsize: 0,
            f_blocks: 0,
            f_bfree: 0,
        }
    }

    /// Allocate a fresh, currently-unused inode number and mark it live.
    pub fn alloc_file_id(&self) -> FileId {
        let mut state = self.alloc_state.lock();
        let id = self.allocator.allocate(&state.live);
        state.live.insert(id);
        self.file_count.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Release an inode number once its entry has been destroyed (§4.8).
    pub fn release_file_id(&self, id: FileId) {
        let mut state = self.alloc_state.lock();
        if state.live.remove(&id) {
            self.file_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Resolve `path` to a locked entry, per §4.4.
    pub fn resolve(
        &self,
        path: &str,
        uid: u32,
        gid: u32,
        mode: LockMode,
        hook: Option<&mut dyn StepHook>,
    ) -> Result<Arc<Entry>> {
        trace!(target: "fskit::core", "resolve {path}");
        walker::resolve(&self.root, path, uid, gid, mode, self.name_max, hook)
    }

    /// `entry_ref`: resolve `path` and take a soft reference (§4.6) — bump
    /// `open_count` without producing a handle.
    pub fn entry_ref(&self, path: &str, uid: u32, gid: u32) -> Result<Arc<Entry>> {
        let entry = self.resolve(path, uid, gid, LockMode::Read, None)?;
        entry.write().open_count += 1;
        Ok(entry)
    }

    /// `entry_ref_entry`: take a soft reference on an entry the caller
    /// already holds, without a fresh path resolution.
    pub fn entry_ref_entry(entry: &Arc<Entry>) -> Arc<Entry> {
        entry.write().open_count += 1;
        Arc::clone(entry)
    }

    /// `entry_unref`: release a soft reference taken by [`Self::entry_ref`]
    /// or [`Self::entry_ref_entry`], attempting destruction if this was the
    /// last reference.
    pub fn entry_unref(&self, path: &str, uid: u32, gid: u32, entry: &Arc<Entry>) -> Result<bool> {
        entry.write().open_count -= 1;
        crate::destroy::try_destroy(self, path, uid, gid, entry)
    }

    /// Walks the whole tree from the root, unconditionally running the
    /// detach protocol on every entry regardless of its current
    /// `open_count`. Used only at shutdown, once the consumer has already
    /// guaranteed there are no live handles left to race with it (§4.8).
    pub fn detach_all(&self) -> Result<()> {
        crate::destroy::detach_all(self)
    }

    /// `core_destroy`: tear down the whole tree and hand back the
    /// application state that was attached at construction.
    pub fn shutdown(self) -> Option<AppState> {
        if let Err(err) = self.detach_all() {
            log::warn!(target: "fskit::core", "shutdown: detach_all reported {err}");
        }
        self.app_state.into_inner()
    }
}

/// §6.1: process-wide setup hook. This port keeps no process-wide mutable
/// state of its own (the default inode allocator's randomness is
/// thread-local and lazily seeded), so this is a no-op kept only for API
/// parity with the kernel-bridge lifecycle the source exposes.
pub fn library_init() {}

/// §6.1: process-wide teardown hook, symmetric with [`library_init`].
pub fn library_shutdown() {}
