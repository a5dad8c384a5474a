//! §4.8: the destruction protocol. `try_destroy` is called whenever an
//! operation decrements `link_count` or `open_count`; `detach_all` is the
//! unconditional, shutdown-only variant.

use std::sync::Arc;

use log::{debug, warn};

use crate::core::Core;
use crate::entry::{Entry, Kind};
use crate::error::Result;
use crate::route::{DetachArgs, RouteContext};

/// Called whenever `link_count` or `open_count` drops. Returns `Ok(true)`
/// if the entry was destroyed by this call (or already had been by a prior
/// one); `Ok(false)` if it is still referenced and remains live.
pub fn try_destroy(core: &Core, path: &str, uid: u32, gid: u32, entry: &Arc<Entry>) -> Result<bool> {
    let destroyable = {
        let state = entry.read();
        matches!(state.kind, Kind::Dead) || state.is_destroyable()
    };
    if !destroyable {
        return Ok(false);
    }
    detach_entry(core, path, uid, gid, entry, false)?;
    Ok(true)
}

/// `detach_all`: depth-first, unconditional detach of the whole tree from
/// the root, used only at shutdown.
pub fn detach_all(core: &Core) -> Result<()> {
    detach_entry(core, "/", 0, 0, core.root(), true)
}

/// Shared implementation. `force` skips the `is_destroyable` re-check
/// (used by `detach_all`, where the caller has already guaranteed no
/// live handles remain to race with it).
fn detach_entry(core: &Core, path: &str, uid: u32, gid: u32, entry: &Arc<Entry>, force: bool) -> Result<()> {
    let mut state = entry.write();
    if matches!(state.kind, Kind::Dead) {
        return Ok(());
    }
    if !force && !state.is_destroyable() {
        // A racing soft ref resurrected this entry between the caller's
        // check and our write lock; nothing to do.
        return Ok(());
    }
    // §4.8: "Run the detach route (once, even if called more than once —
    // the `deletion_in_progress` flag guards against double-detach)". An
    // unlink/rmdir/rename-replace may already have set this flag and run
    // the route itself before handing off to `try_destroy`; only run it
    // here when that hasn't happened yet (e.g. `detach_all`, where it
    // always starts false).
    let already_detached = state.deletion_in_progress;
    state.deletion_in_progress = true;

    if !already_detached {
        let ctx = RouteContext { path, file_id: entry.file_id(), uid, gid };
        let inode_data = state.app_data.as_ref();
        // The detach route is a cleanup notification, not a gate: there is
        // no meaningful structural change left to roll back once an entry
        // has reached zero references, so a route failure is logged and
        // otherwise ignored rather than aborting destruction.
        if let Err(err) = core.routes().read().dispatch_detach(ctx, DetachArgs { inode_data }) {
            warn!(target: "fskit::destroy", "detach route for {path} (file_id={}) failed: {err}", entry.file_id());
        }
    }

    if let Some(children) = state.children.take() {
        for (name, child) in children.iter() {
            let child_path = if path == "/" {
                format!("/{name}")
            } else {
                format!("{path}/{name}")
            };
            detach_entry(core, &child_path, uid, gid, child, true)?;
        }
    }

    let tombstone_parent = state.tombstone_parent.take();
    debug!(target: "fskit::destroy", "destroyed {path} (file_id={})", entry.file_id());
    state.kind = Kind::Dead;
    drop(state);
    core.release_file_id(entry.file_id());
    if let Some(parent) = tombstone_parent {
        let mut parent_state = parent.write();
        parent_state.tombstone_count = parent_state.tombstone_count.saturating_sub(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::entry::Entry;

    #[test]
    fn not_destroyable_while_referenced() {
        let core = Core::new(CoreConfig::new());
        let file = Arc::new(Entry::new_file(core.alloc_file_id(), 0o644, 0, 0));
        file.write().open_count = 1;
        assert!(!try_destroy(&core, "/f", 0, 0, &file).unwrap());
        assert!(!matches!(file.kind(), Kind::Dead));
    }

    #[test]
    fn destroys_when_both_counts_are_zero() {
        let core = Core::new(CoreConfig::new());
        let id = core.alloc_file_id();
        let file = Arc::new(Entry::new_file(id, 0o644, 0, 0));
        file.write().link_count = 0;
        assert!(try_destroy(&core, "/f", 0, 0, &file).unwrap());
        assert!(matches!(file.kind(), Kind::Dead));
    }

    #[test]
    fn double_destroy_is_idempotent() {
        let core = Core::new(CoreConfig::new());
        let id = core.alloc_file_id();
        let file = Arc::new(Entry::new_file(id, 0o644, 0, 0));
        file.write().link_count = 0;
        assert!(try_destroy(&core, "/f", 0, 0, &file).unwrap());
        assert!(try_destroy(&core, "/f", 0, 0, &file).unwrap());
    }

    #[test]
    fn detach_all_tears_down_populated_tree() {
        let core = Core::new(CoreConfig::new());
        let child_id = core.alloc_file_id();
        let child = Arc::new(Entry::new_file(child_id, 0o644, 0, 0));
        core.root().write().children.as_mut().unwrap().insert_unique("a".into(), Arc::clone(&child));
        core.detach_all().unwrap();
        assert!(matches!(core.root().kind(), Kind::Dead));
        assert!(matches!(child.kind(), Kind::Dead));
    }
}
