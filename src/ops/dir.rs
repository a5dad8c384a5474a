//! §4.5/§4.7: `mkdir`, `rmdir`, `unlink`, and the directory-handle/readdir
//! surface (`opendir`/`readdir`/`closedir`/`rewinddir`/`seekdir`/`telldir`).

use std::sync::Arc;

use log::debug;

use crate::core::Core;
use crate::entry::{check_permission, Entry, Timestamp};
use crate::entry_set::hash_name;
use crate::error::{Error, Result};
use crate::handle::{DirEntryView, DirHandle};
use crate::route::{DetachArgs, MkdirArgs, ReaddirArgs, RouteContext};
use crate::walker::LockMode;

use super::{validate_name, W_OK, X_OK};

pub fn mkdir(core: &Core, path: &str, mode: u32, uid: u32, gid: u32) -> Result<()> {
    let (parent_path, name) = super::split_parent(path)?;
    validate_name(&name, core.name_max())?;

    let parent = core.resolve(&parent_path, uid, gid, LockMode::Write, None)?;
    let mut parent_state = parent.write();
    if !check_permission(parent_state.mode, parent_state.uid, parent_state.gid, uid, gid, W_OK | X_OK) {
        return Err(Error::PermissionDenied);
    }
    let hash = hash_name(&name);
    let children = parent_state.children.as_ref().expect("resolve guarantees a directory");
    if children.find_by_hash(hash, &name).filter(|c| c.is_visible()).is_some() {
        return Err(Error::Exists);
    }

    let file_id = core.alloc_file_id();
    let entry = Arc::new(Entry::new_directory(file_id, mode, uid, gid));
    let ctx = RouteContext { path, file_id, uid, gid };
    let app_data = match core.routes().read().dispatch_mkdir(ctx, MkdirArgs { mode }) {
        Ok(data) => data.flatten(),
        Err(err) => {
            core.release_file_id(file_id);
            return Err(err);
        }
    };
    entry.write().app_data = app_data;

    parent_state.children.as_mut().unwrap().insert_unique(name, entry);
    parent_state.mtime = Timestamp::now();
    debug!(target: "fskit::ops", "mkdir {path}: file_id={file_id}");
    Ok(())
}

/// Directory must be empty (no non-`.`/`..` children, §4.5). A tombstoned
/// child that is still open counts as non-empty (§8 boundary behavior):
/// `unlink`/`rmdir`/rename-replace bump `tombstone_count` on this directory
/// when the child they just spliced out survives (still referenced), so
/// that count is checked here alongside the live child set.
pub fn rmdir(core: &Core, path: &str, uid: u32, gid: u32) -> Result<()> {
    let (parent_path, name) = super::split_parent(path)?;
    let parent = core.resolve(&parent_path, uid, gid, LockMode::Write, None)?;
    let target = core.resolve(path, uid, gid, LockMode::Write, None)?;

    {
        let state = target.read();
        if !state.kind.is_directory() {
            return Err(Error::NotDirectory);
        }
        if !state.children.as_ref().expect("directory").is_empty() || state.tombstone_count > 0 {
            return Err(Error::NotEmpty);
        }
    }

    let mut parent_state = parent.write();
    if !check_permission(parent_state.mode, parent_state.uid, parent_state.gid, uid, gid, W_OK | X_OK) {
        return Err(Error::PermissionDenied);
    }

    let file_id = target.file_id();
    let ctx = RouteContext { path, file_id, uid, gid };
    {
        let mut state = target.write();
        let app_data_ref = state.app_data.as_ref();
        core.routes().read().dispatch_detach(ctx, DetachArgs { inode_data: app_data_ref })?;
        state.deletion_in_progress = true;
    }

    let hash = hash_name(&name);
    parent_state.children.as_mut().unwrap().remove_by_hash(hash, &name);
    parent_state.link_count -= 1; // loss of the removed directory's ".."
    parent_state.mtime = Timestamp::now();
    drop(parent_state);

    crate::destroy::try_destroy(core, path, uid, gid, &target)?;
    debug!(target: "fskit::ops", "rmdir {path}: file_id={file_id}");
    Ok(())
}

/// Target must not be a directory (§4.5).
pub fn unlink(core: &Core, path: &str, uid: u32, gid: u32) -> Result<()> {
    let (parent_path, name) = super::split_parent(path)?;
    let parent = core.resolve(&parent_path, uid, gid, LockMode::Write, None)?;
    let target = core.resolve(path, uid, gid, LockMode::Write, None)?;

    if target.is_directory() {
        return Err(Error::IsDirectory);
    }

    let mut parent_state = parent.write();
    if !check_permission(parent_state.mode, parent_state.uid, parent_state.gid, uid, gid, W_OK | X_OK) {
        return Err(Error::PermissionDenied);
    }

    let file_id = target.file_id();
    let ctx = RouteContext { path, file_id, uid, gid };
    let survives = {
        let mut state = target.write();
        let app_data_ref = state.app_data.as_ref();
        core.routes().read().dispatch_detach(ctx, DetachArgs { inode_data: app_data_ref })?;
        state.link_count -= 1;
        if state.link_count == 0 {
            state.deletion_in_progress = true;
        }
        state.link_count > 0 || state.open_count > 0
    };

    let hash = hash_name(&name);
    parent_state.children.as_mut().unwrap().remove_by_hash(hash, &name);
    if survives {
        // Still referenced past this unlink: keep it counted against this
        // directory's emptiness until whatever unref/close finally destroys
        // it (§8 boundary behavior).
        parent_state.tombstone_count += 1;
        target.write().tombstone_parent = Some(Arc::clone(&parent));
    }
    parent_state.mtime = Timestamp::now();
    drop(parent_state);

    crate::destroy::try_destroy(core, path, uid, gid, &target)?;
    debug!(target: "fskit::ops", "unlink {path}: file_id={file_id}");
    Ok(())
}

pub fn opendir(core: &Core, path: &str, uid: u32, gid: u32) -> Result<DirHandle> {
    let entry = core.resolve(path, uid, gid, LockMode::Read, None)?;
    if !entry.is_directory() {
        return Err(Error::NotDirectory);
    }
    if !check_permission(entry.read().mode, entry.read().uid, entry.read().gid, uid, gid, super::R_OK | X_OK) {
        return Err(Error::PermissionDenied);
    }
    let parent_file_id = if path == "/" {
        entry.file_id()
    } else {
        let (parent_path, _) = super::split_parent(path)?;
        core.resolve(&parent_path, uid, gid, LockMode::Read, None)?.file_id()
    };
    entry.write().open_count += 1;
    Ok(DirHandle::new(entry, parent_file_id, path.to_string(), None))
}

pub fn readdir(core: &Core, handle: &DirHandle, n: usize, uid: u32, gid: u32) -> Result<Vec<DirEntryView>> {
    let mut entries = handle.readdir(n);
    let file_id = handle.file_id();
    let ctx = RouteContext { path: handle.path(), file_id, uid, gid };
    core.routes().read().dispatch_readdir(ctx, ReaddirArgs { entries: &mut entries })?;
    Ok(entries)
}

pub fn rewinddir(handle: &DirHandle) {
    handle.rewinddir();
}

pub fn telldir(handle: &DirHandle) -> usize {
    handle.telldir()
}

pub fn seekdir(handle: &DirHandle, pos: usize) {
    handle.seekdir(pos);
}

pub fn closedir(core: &Core, handle: DirHandle, uid: u32, gid: u32) -> Result<()> {
    let path = handle.path().to_string();
    handle.entry().write().open_count -= 1;
    crate::destroy::try_destroy(core, &path, uid, gid, handle.entry())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::ops::create_open::{close, create};
    use crate::route::ConcurrencyMode;

    #[test]
    fn unlink_of_open_file_runs_detach_route_exactly_once() {
        let core = Core::new(CoreConfig::new());
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let calls = std::sync::Arc::clone(&calls);
            core.routes()
                .write()
                .register_detach(crate::route::ROUTE_ANY, ConcurrencyMode::Concurrent, move |_ctx, _args| {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        let h = create(&core, "/a", 0o644, 0, 0).unwrap();
        unlink(&core, "/a", 0, 0).unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        close(&core, h, 0, 0).unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn mkdir_then_rmdir_restores_tree() {
        let core = Core::new(CoreConfig::new());
        mkdir(&core, "/d", 0o755, 0, 0).unwrap();
        let count_with = core.file_count();
        rmdir(&core, "/d", 0, 0).unwrap();
        assert_eq!(core.file_count(), count_with - 1);
    }

    #[test]
    fn rmdir_non_empty_fails() {
        let core = Core::new(CoreConfig::new());
        mkdir(&core, "/d", 0o755, 0, 0).unwrap();
        let h = create(&core, "/d/f", 0o644, 0, 0).unwrap();
        close(&core, h, 0, 0).unwrap();
        let err = rmdir(&core, "/d", 0, 0).unwrap_err();
        assert_eq!(err, Error::NotEmpty);
    }

    #[test]
    fn rmdir_non_empty_while_only_child_is_tombstoned_but_open() {
        let core = Core::new(CoreConfig::new());
        mkdir(&core, "/d", 0o755, 0, 0).unwrap();
        let h = create(&core, "/d/f", 0o644, 0, 0).unwrap();
        unlink(&core, "/d/f", 0, 0).unwrap(); // still open: tombstoned, not destroyed
        let err = rmdir(&core, "/d", 0, 0).unwrap_err();
        assert_eq!(err, Error::NotEmpty);
        close(&core, h, 0, 0).unwrap(); // now destroyed
        rmdir(&core, "/d", 0, 0).unwrap();
    }

    #[test]
    fn create_unlink_restores_tree() {
        let core = Core::new(CoreConfig::new());
        let before = core.file_count();
        let h = create(&core, "/a", 0o644, 0, 0).unwrap();
        close(&core, h, 0, 0).unwrap();
        unlink(&core, "/a", 0, 0).unwrap();
        assert_eq!(core.file_count(), before);
    }

    #[test]
    fn unlink_directory_is_is_directory_error() {
        let core = Core::new(CoreConfig::new());
        mkdir(&core, "/d", 0o755, 0, 0).unwrap();
        let err = unlink(&core, "/d", 0, 0).unwrap_err();
        assert_eq!(err, Error::IsDirectory);
    }

    #[test]
    fn readdir_lists_created_files() {
        let core = Core::new(CoreConfig::new());
        mkdir(&core, "/d", 0o755, 0, 0).unwrap();
        let h = create(&core, "/d/f", 0o644, 0, 0).unwrap();
        close(&core, h, 0, 0).unwrap();
        let dh = opendir(&core, "/d", 0, 0).unwrap();
        let entries = readdir(&core, &dh, 100, 0, 0).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"."));
        assert!(names.contains(&".."));
        assert!(names.contains(&"f"));
    }

    #[test]
    fn rename_moves_file_out_of_source_listing() {
        let core = Core::new(CoreConfig::new());
        mkdir(&core, "/d", 0o755, 0, 0).unwrap();
        let h = create(&core, "/d/f", 0o644, 0, 0).unwrap();
        let id = h.file_id();
        close(&core, h, 0, 0).unwrap();
        crate::ops::rename::rename(&core, "/d/f", "/g", 0, 0).unwrap();
        let dh = opendir(&core, "/d", 0, 0).unwrap();
        let entries = readdir(&core, &dh, 100, 0, 0).unwrap();
        assert!(!entries.iter().any(|e| e.name == "f"));
        let stat = crate::ops::attr::stat(&core, "/g", 0, 0).unwrap();
        assert_eq!(stat.file_id, id);
    }
}
