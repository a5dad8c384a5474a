//! §4.3: the route dispatch table. A route binds a path pattern and an
//! operation kind to a consumer callback; the first matching route (in
//! registration order) wins, and the absence of any match is success with
//! no application data, not an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;

use crate::entry::FileId;
use crate::error::{Error, Result};

/// Opaque, consumer-owned state threaded through inode/handle creation. The
/// REDESIGN FLAGS note in SPEC_FULL.md: this replaces the source's
/// `void* inode_data` / `void* handle_data` output parameters with a typed
/// box resolved once, at the call site, instead of cast at every use.
pub type AppData = Box<dyn std::any::Any + Send + Sync>;

/// Information common to every route dispatch, regardless of op kind.
#[derive(Clone, Copy)]
pub struct RouteContext<'a> {
    pub path: &'a str,
    pub file_id: FileId,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Create,
    Mknod,
    Mkdir,
    Open,
    Close,
    Read,
    Write,
    Trunc,
    Readdir,
    Detach,
    Stat,
    Sync,
    Rename,
    Symlink,
}

/// `concurrent` routes may run in parallel with themselves; `sequential`
/// routes serialize on a per-entry queue (§5: "Route callbacks declared
/// `sequential` serialize on a per-entry queue").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyMode {
    Concurrent,
    Sequential,
}

/// The canonical "matches anything" pattern from §4.3.
pub const ROUTE_ANY: &str = "^([^/]+/*)*$";

struct Route<F: ?Sized> {
    id: u64,
    pattern: Regex,
    concurrency: ConcurrencyMode,
    callback: Box<F>,
}

/// Per-entry serialization for `sequential` routes: one mutex per `file_id`
/// currently being dispatched through at least one sequential route,
/// reclaimed when the last waiter drops it.
#[derive(Default)]
struct SequentialLocks {
    locks: Mutex<HashMap<FileId, Arc<Mutex<()>>>>,
}

impl SequentialLocks {
    fn acquire(&self, file_id: FileId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(file_id).or_default())
    }

    /// Drop the map entry if we were the last reference, so the map doesn't
    /// grow without bound across the inode's lifetime.
    fn release(&self, file_id: FileId, handle: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        if Arc::strong_count(&handle) == 2 {
            // us + the map's own clone: nobody else is waiting.
            locks.remove(&file_id);
        }
        drop(handle);
    }
}

macro_rules! route_kind {
    ($field:ident, $register:ident, $dispatch:ident, $kind:expr, $cb:ty, $out:ty) => {
        /// Register a route for this op kind. Returns the route id, usable
        /// with [`RouteTable::undeclare`].
        pub fn $register(
            &mut self,
            pattern: &str,
            concurrency: ConcurrencyMode,
            callback: impl Fn(RouteContext<'_>, $cb) -> Result<$out> + Send + Sync + 'static,
        ) -> Result<u64> {
            let regex = Regex::new(pattern).map_err(|_| Error::InvalidArgument)?;
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.$field.push(Route {
                id,
                pattern: regex,
                concurrency,
                callback: Box::new(callback),
            });
            Ok(id)
        }

        /// Dispatch `input` to the first route matching `ctx.path`, if any.
        /// `Ok(None)` means no route matched: per §4.3 that is success with
        /// null application data, not an error.
        pub fn $dispatch(
            &self,
            ctx: RouteContext<'_>,
            input: $cb,
        ) -> Result<Option<$out>> {
            let Some(route) = self.$field.iter().find(|r| r.pattern.is_match(ctx.path)) else {
                return Ok(None);
            };
            match route.concurrency {
                ConcurrencyMode::Concurrent => (route.callback)(ctx, input).map(Some),
                ConcurrencyMode::Sequential => {
                    let handle = self.sequential.acquire(ctx.file_id);
                    let _guard = handle.lock();
                    let result = (route.callback)(ctx, input);
                    drop(_guard);
                    self.sequential.release(ctx.file_id, handle);
                    result.map(Some)
                }
            }
        }
    };
}

/// Per-op-kind dispatch table. `Core` holds one behind a reader-writer lock
/// (§5: "mutations acquire a writer lock on the table, dispatches a reader
/// lock").
#[derive(Default)]
pub struct RouteTable {
    next_id: AtomicU64,
    sequential: SequentialLocks,
    create: Vec<Route<dyn Fn(RouteContext<'_>, CreateArgs) -> Result<Option<AppData>> + Send + Sync>>,
    mknod: Vec<Route<dyn Fn(RouteContext<'_>, MknodArgs) -> Result<Option<AppData>> + Send + Sync>>,
    mkdir: Vec<Route<dyn Fn(RouteContext<'_>, MkdirArgs) -> Result<Option<AppData>> + Send + Sync>>,
    open: Vec<Route<dyn Fn(RouteContext<'_>, OpenArgs) -> Result<Option<AppData>> + Send + Sync>>,
    close: Vec<Route<dyn Fn(RouteContext<'_>, CloseArgs<'_>) -> Result<()> + Send + Sync>>,
    read: Vec<Route<dyn Fn(RouteContext<'_>, ReadArgs<'_>) -> Result<usize> + Send + Sync>>,
    write: Vec<Route<dyn Fn(RouteContext<'_>, WriteArgs<'_>) -> Result<usize> + Send + Sync>>,
    trunc: Vec<Route<dyn Fn(RouteContext<'_>, TruncArgs) -> Result<()> + Send + Sync>>,
    readdir: Vec<Route<dyn Fn(RouteContext<'_>, ReaddirArgs<'_>) -> Result<()> + Send + Sync>>,
    detach: Vec<Route<dyn Fn(RouteContext<'_>, DetachArgs<'_>) -> Result<()> + Send + Sync>>,
    stat: Vec<Route<dyn Fn(RouteContext<'_>, ()) -> Result<()> + Send + Sync>>,
    sync: Vec<Route<dyn Fn(RouteContext<'_>, ()) -> Result<()> + Send + Sync>>,
    rename: Vec<Route<dyn Fn(RouteContext<'_>, RenameArgs<'_>) -> Result<()> + Send + Sync>>,
    symlink: Vec<Route<dyn Fn(RouteContext<'_>, SymlinkArgs<'_>) -> Result<()> + Send + Sync>>,
}

pub struct CreateArgs {
    pub mode: u32,
    pub flags: u32,
}
pub struct MknodArgs {
    pub mode: u32,
    pub dev: Option<crate::entry::DeviceId>,
}
pub struct MkdirArgs {
    pub mode: u32,
}
pub struct OpenArgs {
    pub flags: u32,
}
pub struct CloseArgs<'a> {
    pub handle_data: Option<&'a AppData>,
}
pub struct ReadArgs<'a> {
    pub handle_data: Option<&'a AppData>,
    pub buf: &'a mut [u8],
    pub offset: u64,
}
pub struct WriteArgs<'a> {
    pub handle_data: Option<&'a AppData>,
    pub buf: &'a [u8],
    pub offset: u64,
}
pub struct TruncArgs {
    pub new_size: u64,
}
pub struct ReaddirArgs<'a> {
    pub entries: &'a mut Vec<crate::handle::DirEntryView>,
}
pub struct DetachArgs<'a> {
    pub inode_data: Option<&'a AppData>,
}
pub struct RenameArgs<'a> {
    pub new_path: &'a str,
}
pub struct SymlinkArgs<'a> {
    pub target: &'a [u8],
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    route_kind!(create, register_create, dispatch_create, OpKind::Create, CreateArgs, Option<AppData>);
    route_kind!(mknod, register_mknod, dispatch_mknod, OpKind::Mknod, MknodArgs, Option<AppData>);
    route_kind!(mkdir, register_mkdir, dispatch_mkdir, OpKind::Mkdir, MkdirArgs, Option<AppData>);
    route_kind!(open, register_open, dispatch_open, OpKind::Open, OpenArgs, Option<AppData>);

    /// Remove a previously-registered route by id, searching every op kind's
    /// table (ids are globally unique, so at most one vec will match).
    pub fn undeclare(&mut self, id: u64) -> bool {
        macro_rules! try_remove {
            ($field:ident) => {
                if let Some(pos) = self.$field.iter().position(|r| r.id == id) {
                    self.$field.remove(pos);
                    return true;
                }
            };
        }
        try_remove!(create);
        try_remove!(mknod);
        try_remove!(mkdir);
        try_remove!(open);
        try_remove!(close);
        try_remove!(read);
        try_remove!(write);
        try_remove!(trunc);
        try_remove!(readdir);
        try_remove!(detach);
        try_remove!(stat);
        try_remove!(sync);
        try_remove!(rename);
        try_remove!(symlink);
        false
    }

    pub fn register_close(
        &mut self,
        pattern: &str,
        concurrency: ConcurrencyMode,
        callback: impl for<'a> Fn(RouteContext<'a>, CloseArgs<'a>) -> Result<()> + Send + Sync + 'static,
    ) -> Result<u64> {
        let regex = Regex::new(pattern).map_err(|_| Error::InvalidArgument)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.close.push(Route {
            id,
            pattern: regex,
            concurrency,
            callback: Box::new(callback),
        });
        Ok(id)
    }

    pub fn dispatch_close(&self, ctx: RouteContext<'_>, input: CloseArgs<'_>) -> Result<Option<()>> {
        let Some(route) = self.close.iter().find(|r| r.pattern.is_match(ctx.path)) else {
            return Ok(None);
        };
        match route.concurrency {
            ConcurrencyMode::Concurrent => (route.callback)(ctx, input).map(Some),
            ConcurrencyMode::Sequential => {
                let handle = self.sequential.acquire(ctx.file_id);
                let _guard = handle.lock();
                let result = (route.callback)(ctx, input);
                drop(_guard);
                self.sequential.release(ctx.file_id, handle);
                result.map(Some)
            }
        }
    }

    pub fn register_read(
        &mut self,
        pattern: &str,
        concurrency: ConcurrencyMode,
        callback: impl for<'a> Fn(RouteContext<'a>, ReadArgs<'a>) -> Result<usize> + Send + Sync + 'static,
    ) -> Result<u64> {
        let regex = Regex::new(pattern).map_err(|_| Error::InvalidArgument)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.read.push(Route {
            id,
            pattern: regex,
            concurrency,
            callback: Box::new(callback),
        });
        Ok(id)
    }

    pub fn dispatch_read(&self, ctx: RouteContext<'_>, input: ReadArgs<'_>) -> Result<Option<usize>> {
        let Some(route) = self.read.iter().find(|r| r.pattern.is_match(ctx.path)) else {
            return Ok(None);
        };
        match route.concurrency {
            ConcurrencyMode::Concurrent => (route.callback)(ctx, input).map(Some),
            ConcurrencyMode::Sequential => {
                let handle = self.sequential.acquire(ctx.file_id);
                let _guard = handle.lock();
                let result = (route.callback)(ctx, input);
                drop(_guard);
                self.sequential.release(ctx.file_id, handle);
                result.map(Some)
            }
        }
    }

    pub fn register_write(
        &mut self,
        pattern: &str,
        concurrency: ConcurrencyMode,
        callback: impl for<'a> Fn(RouteContext<'a>, WriteArgs<'a>) -> Result<usize> + Send + Sync + 'static,
    ) -> Result<u64> {
        let regex = Regex::new(pattern).map_err(|_| Error::InvalidArgument)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write.push(Route {
            id,
            pattern: regex,
            concurrency,
            callback: Box::new(callback),
        });
        Ok(id)
    }

    pub fn dispatch_write(&self, ctx: RouteContext<'_>, input: WriteArgs<'_>) -> Result<Option<usize>> {
        let Some(route) = self.write.iter().find(|r| r.pattern.is_match(ctx.path)) else {
            return Ok(None);
        };
        match route.concurrency {
            ConcurrencyMode::Concurrent => (route.callback)(ctx, input).map(Some),
            ConcurrencyMode::Sequential => {
                let handle = self.sequential.acquire(ctx.file_id);
                let _guard = handle.lock();
                let result = (route.callback)(ctx, input);
                drop(_guard);
                self.sequential.release(ctx.file_id, handle);
                result.map(Some)
            }
        }
    }

    route_kind!(trunc, register_trunc, dispatch_trunc, OpKind::Trunc, TruncArgs, ());
    route_kind!(stat, register_stat, dispatch_stat, OpKind::Stat, (), ());
    route_kind!(sync, register_sync, dispatch_sync, OpKind::Sync, (), ());

    pub fn register_readdir(
        &mut self,
        pattern: &str,
        concurrency: ConcurrencyMode,
        callback: impl for<'a> Fn(RouteContext<'a>, ReaddirArgs<'a>) -> Result<()> + Send + Sync + 'static,
    ) -> Result<u64> {
        let regex = Regex::new(pattern).map_err(|_| Error::InvalidArgument)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.readdir.push(Route {
            id,
            pattern: regex,
            concurrency,
            callback: Box::new(callback),
        });
        Ok(id)
    }

    pub fn dispatch_readdir(&self, ctx: RouteContext<'_>, input: ReaddirArgs<'_>) -> Result<Option<()>> {
        let Some(route) = self.readdir.iter().find(|r| r.pattern.is_match(ctx.path)) else {
            return Ok(None);
        };
        match route.concurrency {
            ConcurrencyMode::Concurrent => (route.callback)(ctx, input).map(Some),
            ConcurrencyMode::Sequential => {
                let handle = self.sequential.acquire(ctx.file_id);
                let _guard = handle.lock();
                let result = (route.callback)(ctx, input);
                drop(_guard);
                self.sequential.release(ctx.file_id, handle);
                result.map(Some)
            }
        }
    }

    pub fn register_detach(
        &mut self,
        pattern: &str,
        concurrency: ConcurrencyMode,
        callback: impl for<'a> Fn(RouteContext<'a>, DetachArgs<'a>) -> Result<()> + Send + Sync + 'static,
    ) -> Result<u64> {
        let regex = Regex::new(pattern).map_err(|_| Error::InvalidArgument)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.detach.push(Route {
            id,
            pattern: regex,
            concurrency,
            callback: Box::new(callback),
        });
        Ok(id)
    }

    pub fn dispatch_detach(&self, ctx: RouteContext<'_>, input: DetachArgs<'_>) -> Result<Option<()>> {
        let Some(route) = self.detach.iter().find(|r| r.pattern.is_match(ctx.path)) else {
            return Ok(None);
        };
        match route.concurrency {
            ConcurrencyMode::Concurrent => (route.callback)(ctx, input).map(Some),
            ConcurrencyMode::Sequential => {
                let handle = self.sequential.acquire(ctx.file_id);
                let _guard = handle.lock();
                let result = (route.callback)(ctx, input);
                drop(_guard);
                self.sequential.release(ctx.file_id, handle);
                result.map(Some)
            }
        }
    }

    pub fn register_rename(
        &mut self,
        pattern: &str,
        concurrency: ConcurrencyMode,
        callback: impl for<'a> Fn(RouteContext<'a>, RenameArgs<'a>) -> Result<()> + Send + Sync + 'static,
    ) -> Result<u64> {
        let regex = Regex::new(pattern).map_err(|_| Error::InvalidArgument)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.rename.push(Route {
            id,
            pattern: regex,
            concurrency,
            callback: Box::new(callback),
        });
        Ok(id)
    }

    pub fn dispatch_rename(&self, ctx: RouteContext<'_>, input: RenameArgs<'_>) -> Result<Option<()>> {
        let Some(route) = self.rename.iter().find(|r| r.pattern.is_match(ctx.path)) else {
            return Ok(None);
        };
        match route.concurrency {
            ConcurrencyMode::Concurrent => (route.callback)(ctx, input).map(Some),
            ConcurrencyMode::Sequential => {
                let handle = self.sequential.acquire(ctx.file_id);
                let _guard = handle.lock();
                let result = (route.callback)(ctx, input);
                drop(_guard);
                self.sequential.release(ctx.file_id, handle);
                result.map(Some)
            }
        }
    }

    pub fn register_symlink(
        &mut self,
        pattern: &str,
        concurrency: ConcurrencyMode,
        callback: impl for<'a> Fn(RouteContext<'a>, SymlinkArgs<'a>) -> Result<()> + Send + Sync + 'static,
    ) -> Result<u64> {
        let regex = Regex::new(pattern).map_err(|_| Error::InvalidArgument)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.symlink.push(Route {
            id,
            pattern: regex,
            concurrency,
            callback: Box::new(callback),
        });
        Ok(id)
    }

    pub fn dispatch_symlink(&self, ctx: RouteContext<'_>, input: SymlinkArgs<'_>) -> Result<Option<()>> {
        let Some(route) = self.symlink.iter().find(|r| r.pattern.is_match(ctx.path)) else {
            return Ok(None);
        };
        match route.concurrency {
            ConcurrencyMode::Concurrent => (route.callback)(ctx, input).map(Some),
            ConcurrencyMode::Sequential => {
                let handle = self.sequential.acquire(ctx.file_id);
                let _guard = handle.lock();
                let result = (route.callback)(ctx, input);
                drop(_guard);
                self.sequential.release(ctx.file_id, handle);
                result.map(Some)
            }
        }
    }
}
