//! §4.5: `symlink` and `readlink`. The target string is untrusted and
//! stored verbatim; this crate never interprets or validates it.

use std::sync::Arc;

use log::debug;

use crate::core::Core;
use crate::entry::{check_permission, Entry};
use crate::entry_set::hash_name;
use crate::error::{Error, Result};
use crate::route::{RouteContext, SymlinkArgs};
use crate::walker::LockMode;

use super::{validate_name, W_OK, X_OK};

/// Creates a symlink entry whose target is `target` unchanged; no path
/// validation is performed on it (§4.5).
pub fn symlink(core: &Core, target: &[u8], linkpath: &str, mode: u32, uid: u32, gid: u32) -> Result<()> {
    let (parent_path, name) = super::split_parent(linkpath)?;
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
    let entry = Arc::new(Entry::new_symlink(file_id, mode, uid, gid, target.to_vec()));
    let ctx = RouteContext { path: linkpath, file_id, uid, gid };
    if let Err(err) = core.routes().read().dispatch_symlink(ctx, SymlinkArgs { target }) {
        core.release_file_id(file_id);
        return Err(err);
    }

    parent_state.children.as_mut().unwrap().insert_unique(name, entry);
    debug!(target: "fskit::ops", "symlink {linkpath}: file_id={file_id}");
    Ok(())
}

/// Copies up to `cap` bytes of the target into `out`, returning the byte
/// count actually copied (no terminator, §4.5).
pub fn readlink(core: &Core, path: &str, uid: u32, gid: u32, out: &mut [u8]) -> Result<usize> {
    let entry = core.resolve(path, uid, gid, LockMode::Read, None)?;
    let state = entry.read();
    let target = state.symlink_target.as_deref().ok_or(Error::InvalidArgument)?;
    let n = target.len().min(out.len());
    out[..n].copy_from_slice(&target[..n]);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;

    #[test]
    fn symlink_then_readlink_round_trips_target() {
        let core = Core::new(CoreConfig::new());
        symlink(&core, b"/a/b/c", "/link", 0o777, 0, 0).unwrap();
        let mut buf = [0u8; 16];
        let n = readlink(&core, "/link", 0, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"/a/b/c");
    }

    #[test]
    fn readlink_truncates_to_capacity() {
        let core = Core::new(CoreConfig::new());
        symlink(&core, b"0123456789", "/link", 0o777, 0, 0).unwrap();
        let mut buf = [0u8; 4];
        let n = readlink(&core, "/link", 0, 0, &mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, b"0123");
    }

    #[test]
    fn readlink_on_non_symlink_is_invalid() {
        let core = Core::new(CoreConfig::new());
        crate::ops::dir::mkdir(&core, "/d", 0o755, 0, 0).unwrap();
        let mut buf = [0u8; 4];
        let err = readlink(&core, "/d", 0, 0, &mut buf).unwrap_err();
        assert_eq!(err, Error::InvalidArgument);
    }

    #[test]
    fn symlink_existing_name_fails() {
        let core = Core::new(CoreConfig::new());
        symlink(&core, b"target", "/link", 0o777, 0, 0).unwrap();
        let err = symlink(&core, b"other", "/link", 0o777, 0, 0).unwrap_err();
        assert_eq!(err, Error::Exists);
    }
}
