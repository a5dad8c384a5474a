//! §4.5: `rename`. The only operation that locks two non-ancestor
//! subtrees; per §5 the two parent directories are acquired in ascending
//! pointer order to rule out ABBA deadlocks against a concurrent rename
//! moving something the other way. Renaming within a single parent instead
//! takes that one directory's write lock once.

use std::sync::Arc;

use log::debug;

use crate::core::Core;
use crate::entry::{check_permission, Entry, EntryState, Timestamp};
use crate::entry_set::hash_name;
use crate::error::{Error, Result};
use crate::route::{DetachArgs, RenameArgs, RouteContext};
use crate::walker::LockMode;

use super::{validate_name, W_OK, X_OK};

fn ptr_addr(entry: &Arc<Entry>) -> usize {
    Arc::as_ptr(entry) as usize
}

fn check_parent_perm(state: &EntryState, uid: u32, gid: u32) -> Result<()> {
    if !check_permission(state.mode, state.uid, state.gid, uid, gid, W_OK | X_OK) {
        return Err(Error::PermissionDenied);
    }
    Ok(())
}

/// Both must be directories (and `dest` empty) or both must be non-
/// directories; anything else is a kind mismatch (§4.5: "must be
/// compatible").
fn check_compatible(source: &Arc<Entry>, dest: &Arc<Entry>) -> Result<()> {
    match (source.is_directory(), dest.is_directory()) {
        (true, true) => {
            if !dest.read().children.as_ref().expect("directory").is_empty() {
                return Err(Error::NotEmpty);
            }
            Ok(())
        }
        (true, false) => Err(Error::NotDirectory),
        (false, true) => Err(Error::IsDirectory),
        (false, false) => Ok(()),
    }
}

/// Detach `dest` (already looked up under `name` in `dest_parent_state`'s
/// children) the same way `unlink`/`rmdir` would, then splice it out —
/// this is the "atomically unlinked" half of replacing a rename target.
/// `try_destroy` itself runs the detach route at most once (§4.8), guarded
/// by `deletion_in_progress`, which this function sets before handing off.
fn clear_destination(
    core: &Core,
    dest_parent: &Arc<Entry>,
    dest_parent_state: &mut EntryState,
    name: &str,
    dest: &Arc<Entry>,
    path: &str,
    uid: u32,
    gid: u32,
) -> Result<()> {
    let file_id = dest.file_id();
    let ctx = RouteContext { path, file_id, uid, gid };
    let is_dir = dest.is_directory();
    let survives = {
        let mut state = dest.write();
        let app_data_ref = state.app_data.as_ref();
        core.routes().read().dispatch_detach(ctx, DetachArgs { inode_data: app_data_ref })?;
        if is_dir {
            state.deletion_in_progress = true;
        } else {
            state.link_count -= 1;
            if state.link_count == 0 {
                state.deletion_in_progress = true;
            }
        }
        state.link_count > 0 || state.open_count > 0
    };
    let hash = hash_name(name);
    dest_parent_state.children.as_mut().unwrap().remove_by_hash(hash, name);
    if is_dir {
        dest_parent_state.link_count -= 1; // loss of the removed directory's ".."
    }
    if survives {
        // Replaced while still referenced elsewhere: keep it counted
        // against `dest_parent`'s emptiness until it's actually destroyed
        // (same boundary behavior `unlink` enforces, §8).
        dest_parent_state.tombstone_count += 1;
        dest.write().tombstone_parent = Some(Arc::clone(dest_parent));
    }
    crate::destroy::try_destroy(core, path, uid, gid, dest)?;
    Ok(())
}

/// Look up the source (must exist and be visible) and an optional
/// pre-existing, visible destination, and validate they're compatible.
/// Shared by both the same-parent and cross-parent paths; takes whichever
/// `EntryState` each child currently lives in.
fn resolve_source_and_dest(
    old_state: &EntryState,
    old_name: &str,
    new_state: &EntryState,
    new_name: &str,
) -> Result<(Arc<Entry>, Option<Arc<Entry>>)> {
    let old_hash = hash_name(old_name);
    let source = old_state
        .children
        .as_ref()
        .expect("directory")
        .find_by_hash(old_hash, old_name)
        .filter(|c| c.is_visible())
        .ok_or(Error::NotFound)?;

    let new_hash = hash_name(new_name);
    let dest = new_state
        .children
        .as_ref()
        .expect("directory")
        .find_by_hash(new_hash, new_name)
        .filter(|c| c.is_visible());

    if let Some(dest) = &dest {
        if !Arc::ptr_eq(dest, &source) {
            check_compatible(&source, dest)?;
        }
    }
    Ok((source, dest))
}

fn rename_same_parent(
    core: &Core,
    parent: &Arc<Entry>,
    state: &mut EntryState,
    old_name: &str,
    new_name: &str,
    old_path: &str,
    new_path: &str,
    uid: u32,
    gid: u32,
) -> Result<()> {
    check_parent_perm(state, uid, gid)?;
    let (source, dest) = resolve_source_and_dest(&*state, old_name, &*state, new_name)?;
    if let Some(dest) = &dest {
        if Arc::ptr_eq(dest, &source) {
            return Ok(()); // renaming a path onto itself: a no-op (§8 idempotence law)
        }
    }

    let file_id = source.file_id();
    let ctx = RouteContext { path: old_path, file_id, uid, gid };
    core.routes().read().dispatch_rename(ctx, RenameArgs { new_path })?;

    if let Some(dest) = &dest {
        clear_destination(core, parent, state, new_name, dest, new_path, uid, gid)?;
    }

    let old_hash = hash_name(old_name);
    state.children.as_mut().unwrap().remove_by_hash(old_hash, old_name);
    state.children.as_mut().unwrap().insert_unique(new_name.to_string(), source);
    state.mtime = Timestamp::now();
    debug!(target: "fskit::ops", "rename {old_path} -> {new_path}: file_id={file_id}");
    Ok(())
}

fn rename_cross_parent(
    core: &Core,
    old_parent: &Arc<Entry>,
    old_state: &mut EntryState,
    old_name: &str,
    new_parent: &Arc<Entry>,
    new_state: &mut EntryState,
    new_name: &str,
    old_path: &str,
    new_path: &str,
    uid: u32,
    gid: u32,
) -> Result<()> {
    check_parent_perm(old_state, uid, gid)?;
    check_parent_perm(new_state, uid, gid)?;
    let (source, dest) = resolve_source_and_dest(old_state, old_name, new_state, new_name)?;

    let file_id = source.file_id();
    let ctx = RouteContext { path: old_path, file_id, uid, gid };
    core.routes().read().dispatch_rename(ctx, RenameArgs { new_path })?;

    if let Some(dest) = &dest {
        clear_destination(core, new_parent, new_state, new_name, dest, new_path, uid, gid)?;
    }

    let old_hash = hash_name(old_name);
    old_state.children.as_mut().unwrap().remove_by_hash(old_hash, old_name);
    new_state.children.as_mut().unwrap().insert_unique(new_name.to_string(), source);
    old_state.mtime = Timestamp::now();
    new_state.mtime = Timestamp::now();
    debug!(target: "fskit::ops", "rename {old_path} -> {new_path}: file_id={file_id}");
    Ok(())
}

pub fn rename(core: &Core, old: &str, new: &str, uid: u32, gid: u32) -> Result<()> {
    let (old_parent_path, old_name) = super::split_parent(old)?;
    let (new_parent_path, new_name) = super::split_parent(new)?;
    validate_name(&new_name, core.name_max())?;

    let old_parent = core.resolve(&old_parent_path, uid, gid, LockMode::Write, None)?;
    let new_parent = core.resolve(&new_parent_path, uid, gid, LockMode::Write, None)?;

    if Arc::ptr_eq(&old_parent, &new_parent) {
        let mut state = old_parent.write();
        return rename_same_parent(core, &old_parent, &mut state, &old_name, &new_name, old, new, uid, gid);
    }

    if ptr_addr(&old_parent) < ptr_addr(&new_parent) {
        let mut old_state = old_parent.write();
        let mut new_state = new_parent.write();
        rename_cross_parent(
            core, &old_parent, &mut old_state, &old_name, &new_parent, &mut new_state, &new_name, old, new, uid, gid,
        )
    } else {
        let mut new_state = new_parent.write();
        let mut old_state = old_parent.write();
        rename_cross_parent(
            core, &old_parent, &mut old_state, &old_name, &new_parent, &mut new_state, &new_name, old, new, uid, gid,
        )
    }
}
