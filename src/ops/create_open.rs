//! §4.5: `create`, `open`, `close`, `read`, `write`.

use std::sync::Arc;

use log::debug;

use crate::core::Core;
use crate::entry::{check_permission, Entry, Timestamp};
use crate::error::{Error, Result};
use crate::handle::{FileHandle, OpenFlags};
use crate::entry_set::hash_name;
use crate::route::{CreateArgs, OpenArgs, ReadArgs, RouteContext, TruncArgs, WriteArgs};
use crate::walker::LockMode;

use super::{validate_name, R_OK, W_OK};

/// `O_CREAT|O_WRONLY|O_TRUNC` (§4.5).
pub fn create(core: &Core, path: &str, mode: u32, uid: u32, gid: u32) -> Result<FileHandle> {
    let flags = OpenFlags::CREAT | OpenFlags::WRONLY | OpenFlags::TRUNC;
    open(core, path, flags, mode, uid, gid)
}

pub fn open(core: &Core, path: &str, flags: OpenFlags, mode: u32, uid: u32, gid: u32) -> Result<FileHandle> {
    let (parent_path, name) = super::split_parent(path)?;
    validate_name(&name, core.name_max())?;

    let parent = core.resolve(&parent_path, uid, gid, LockMode::Write, None)?;
    let hash = hash_name(&name);
    let mut parent_state = parent.write();
    let existing = parent_state
        .children
        .as_ref()
        .expect("resolve guarantees a directory")
        .find_by_hash(hash, &name);

    if let Some(child) = existing.clone().filter(|c| c.is_visible()) {
        if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
            return Err(Error::Exists);
        }
        drop(parent_state);
        return open_existing(core, path, &child, flags, uid, gid);
    }

    if !flags.contains(OpenFlags::CREAT) {
        return Err(Error::NotFound);
    }

    // §4.8 garbage collection: a tombstoned child with open_count > 0 may
    // still be occupying this name. It can be reused only if it is now
    // fully detachable; otherwise the name is still taken.
    if let Some(tombstone) = existing {
        let link_count_zero = tombstone.read().link_count == 0;
        if !link_count_zero || !crate::destroy::try_destroy(core, path, uid, gid, &tombstone)? {
            return Err(Error::Exists);
        }
        parent_state.children.as_mut().unwrap().remove_by_hash(hash, &name);
    }

    if !check_permission(
        parent_state.mode,
        parent_state.uid,
        parent_state.gid,
        uid,
        gid,
        W_OK | super::X_OK,
    ) {
        return Err(Error::PermissionDenied);
    }

    let file_id = core.alloc_file_id();
    let entry = Arc::new(Entry::new_file(file_id, mode, uid, gid));
    let ctx = RouteContext { path, file_id, uid, gid };
    let app_data = match core.routes().read().dispatch_create(ctx, CreateArgs { mode, flags: flags.bits() }) {
        Ok(data) => data.flatten(),
        Err(err) => {
            core.release_file_id(file_id);
            return Err(err);
        }
    };

    parent_state.children.as_mut().unwrap().insert_unique(name, Arc::clone(&entry));
    parent_state.mtime = Timestamp::now();
    drop(parent_state);

    entry.write().open_count += 1;
    debug!(target: "fskit::ops", "create {path}: file_id={file_id}");
    Ok(FileHandle::new(entry, flags, path.to_string(), app_data))
}

fn open_existing(core: &Core, path: &str, entry: &Arc<Entry>, flags: OpenFlags, uid: u32, gid: u32) -> Result<FileHandle> {
    {
        let state = entry.read();
        if state.kind.is_directory() && flags.wants_write() {
            return Err(Error::IsDirectory);
        }
        let mut mask = 0;
        if flags.wants_read() {
            mask |= R_OK;
        }
        if flags.wants_write() {
            mask |= W_OK;
        }
        if mask != 0 && !check_permission(state.mode, state.uid, state.gid, uid, gid, mask) {
            return Err(Error::PermissionDenied);
        }
    }

    if flags.contains(OpenFlags::TRUNC) {
        // §9 Open Questions: the source allows `O_RDONLY | O_TRUNC`
        // contrary to POSIX; this port matches that documented relaxation
        // rather than rejecting it.
        let file_id = entry.file_id();
        let ctx = RouteContext { path, file_id, uid, gid };
        core.routes().read().dispatch_trunc(ctx, TruncArgs { new_size: 0 })?;
        let mut state = entry.write();
        state.size = 0;
        state.mtime = Timestamp::now();
    }

    let file_id = entry.file_id();
    let ctx = RouteContext { path, file_id, uid, gid };
    let app_data = core
        .routes()
        .read()
        .dispatch_open(ctx, OpenArgs { flags: flags.bits() })?
        .flatten();
    entry.write().open_count += 1;
    Ok(FileHandle::new(Arc::clone(entry), flags, path.to_string(), app_data))
}

pub fn close(core: &Core, handle: FileHandle, uid: u32, gid: u32) -> Result<()> {
    let file_id = handle.file_id();
    let path = handle.path().to_string();
    let ctx = RouteContext { path: &path, file_id, uid, gid };
    {
        let app_data = handle.app_data();
        core.routes().read().dispatch_close(ctx, crate::route::CloseArgs { handle_data: app_data.as_ref() })?;
    }
    handle.entry().write().open_count -= 1;
    crate::destroy::try_destroy(core, &path, uid, gid, handle.entry())?;
    Ok(())
}

pub fn read(core: &Core, handle: &FileHandle, buf: &mut [u8], offset: u64, uid: u32, gid: u32) -> Result<usize> {
    if !handle.flags().wants_read() {
        return Err(Error::PermissionDenied);
    }
    let file_id = handle.file_id();
    let ctx = RouteContext { path: handle.path(), file_id, uid, gid };
    let n = {
        let app_data = handle.app_data();
        core.routes()
            .read()
            .dispatch_read(ctx, ReadArgs { handle_data: app_data.as_ref(), buf, offset })?
            .unwrap_or(0)
    };
    handle.entry().write().atime = Timestamp::now();
    Ok(n)
}

pub fn write(core: &Core, handle: &FileHandle, buf: &[u8], offset: u64, uid: u32, gid: u32) -> Result<usize> {
    if !handle.flags().wants_write() {
        return Err(Error::PermissionDenied);
    }
    let file_id = handle.file_id();
    let ctx = RouteContext { path: handle.path(), file_id, uid, gid };
    let n = {
        let app_data = handle.app_data();
        core.routes()
            .read()
            .dispatch_write(ctx, WriteArgs { handle_data: app_data.as_ref(), buf, offset })?
            .unwrap_or(0)
    };
    let mut state = handle.entry().write();
    state.size = state.size.max(offset + n as u64);
    state.mtime = Timestamp::now();
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::route::ConcurrencyMode;

    #[test]
    fn create_then_open_sees_same_file_id() {
        let core = Core::new(CoreConfig::new());
        let h1 = create(&core, "/a", 0o644, 0, 0).unwrap();
        let id = h1.file_id();
        close(&core, h1, 0, 0).unwrap();
        let h2 = open(&core, "/a", OpenFlags::RDONLY, 0, 0, 0).unwrap();
        assert_eq!(h2.file_id(), id);
    }

    #[test]
    fn excl_create_on_existing_fails() {
        let core = Core::new(CoreConfig::new());
        let h1 = create(&core, "/a", 0o644, 0, 0).unwrap();
        close(&core, h1, 0, 0).unwrap();
        let err = open(&core, "/a", OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::WRONLY, 0o644, 0, 0).unwrap_err();
        assert_eq!(err, Error::Exists);
    }

    #[test]
    fn open_missing_without_creat_is_not_found() {
        let core = Core::new(CoreConfig::new());
        let err = open(&core, "/missing", OpenFlags::RDONLY, 0, 0, 0).unwrap_err();
        assert_eq!(err, Error::NotFound);
    }

    #[test]
    fn write_then_read_round_trips() {
        let core = Core::new(CoreConfig::new());
        core.routes()
            .write()
            .register_write("^/.*$", ConcurrencyMode::Concurrent, |_ctx, args| Ok(args.buf.len()))
            .unwrap();
        core.routes()
            .write()
            .register_read("^/.*$", ConcurrencyMode::Concurrent, |_ctx, args| {
                args.buf[..2].copy_from_slice(b"hi");
                Ok(2)
            })
            .unwrap();
        let h = create(&core, "/a", 0o644, 0, 0).unwrap();
        let n = write(&core, &h, b"hi", 0, 0, 0).unwrap();
        assert_eq!(n, 2);
        assert_eq!(h.entry().stat().size, 2);
        let mut buf = [0u8; 2];
        let n = read(&core, &h, &mut buf, 0, 0, 0).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn unlink_of_open_file_leaves_handle_working() {
        let core = Core::new(CoreConfig::new());
        core.routes()
            .write()
            .register_write("^/.*$", ConcurrencyMode::Concurrent, |_ctx, args| Ok(args.buf.len()))
            .unwrap();
        core.routes()
            .write()
            .register_read("^/.*$", ConcurrencyMode::Concurrent, |_ctx, args| {
                args.buf[..2].copy_from_slice(b"hi");
                Ok(2)
            })
            .unwrap();
        let h1 = create(&core, "/a", 0o644, 0, 0).unwrap();
        crate::ops::dir::unlink(&core, "/a", 0, 0).unwrap();
        assert_eq!(write(&core, &h1, b"hi", 0, 0, 0).unwrap(), 2);
        let mut buf = [0u8; 2];
        assert_eq!(read(&core, &h1, &mut buf, 0, 0, 0).unwrap(), 2);
        close(&core, h1, 0, 0).unwrap();
        let err = open(&core, "/a", OpenFlags::RDONLY, 0, 0, 0).unwrap_err();
        assert_eq!(err, Error::NotFound);
    }

    #[test]
    fn rdonly_trunc_is_allowed() {
        let core = Core::new(CoreConfig::new());
        let h = create(&core, "/a", 0o644, 0, 0).unwrap();
        close(&core, h, 0, 0).unwrap();
        let h2 = open(&core, "/a", OpenFlags::RDONLY | OpenFlags::TRUNC, 0, 0, 0);
        assert!(h2.is_ok());
    }
}
