//! §4.5: `mknod` — create a special-file entry whose [`Kind`] is decided by
//! the `S_IFMT` bits of `mode`, matching the POSIX `mknod(2)` convention.

use std::sync::Arc;

use log::debug;

use crate::core::Core;
use crate::entry::{check_permission, DeviceId, Entry, Kind, Timestamp};
use crate::entry_set::hash_name;
use crate::error::{Error, Result};
use crate::route::{MknodArgs, RouteContext};
use crate::walker::LockMode;

use super::{validate_name, W_OK, X_OK};

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFCHR: u32 = 0o020000;
const S_IFBLK: u32 = 0o060000;
const S_IFIFO: u32 = 0o010000;
const S_IFSOCK: u32 = 0o140000;

fn kind_of(mode: u32) -> Result<Kind> {
    match mode & S_IFMT {
        S_IFREG | 0 => Ok(Kind::File),
        S_IFCHR => Ok(Kind::CharDevice),
        S_IFBLK => Ok(Kind::BlockDevice),
        S_IFIFO => Ok(Kind::Fifo),
        S_IFSOCK => Ok(Kind::Socket),
        _ => Err(Error::InvalidArgument),
    }
}

pub fn mknod(core: &Core, path: &str, mode: u32, dev: Option<DeviceId>, uid: u32, gid: u32) -> Result<()> {
    let kind = kind_of(mode)?;
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
    let entry = Arc::new(Entry::new_special(file_id, kind, mode & !S_IFMT, uid, gid, dev));
    let ctx = RouteContext { path, file_id, uid, gid };
    let app_data = match core.routes().read().dispatch_mknod(ctx, MknodArgs { mode, dev }) {
        Ok(data) => data.flatten(),
        Err(err) => {
            core.release_file_id(file_id);
            return Err(err);
        }
    };
    entry.write().app_data = app_data;

    parent_state.children.as_mut().unwrap().insert_unique(name, entry);
    parent_state.mtime = Timestamp::now();
    debug!(target: "fskit::ops", "mknod {path}: file_id={file_id} kind={kind:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;

    #[test]
    fn mknod_regular_file_then_stat_reports_nlink_one() {
        let core = Core::new(CoreConfig::new());
        mknod(&core, "/test", S_IFREG | 0o644, None, 0, 0).unwrap();
        let st = crate::ops::attr::stat(&core, "/test", 0, 0).unwrap();
        assert!(matches!(st.kind, Kind::File));
        assert_eq!(st.uid, 0);
        assert_eq!(st.nlink, 1);
    }

    #[test]
    fn mknod_char_device_carries_dev_pair() {
        let core = Core::new(CoreConfig::new());
        let dev = DeviceId { major: 1, minor: 3 };
        mknod(&core, "/null", S_IFCHR | 0o666, Some(dev), 0, 0).unwrap();
        let st = crate::ops::attr::stat(&core, "/null", 0, 0).unwrap();
        assert!(matches!(st.kind, Kind::CharDevice));
        assert_eq!(st.rdev, Some(dev));
    }

    #[test]
    fn mknod_existing_name_fails() {
        let core = Core::new(CoreConfig::new());
        mknod(&core, "/a", S_IFIFO | 0o644, None, 0, 0).unwrap();
        let err = mknod(&core, "/a", S_IFIFO | 0o644, None, 0, 0).unwrap_err();
        assert_eq!(err, Error::Exists);
    }

    #[test]
    fn mknod_rejects_directory_and_symlink_bits() {
        let core = Core::new(CoreConfig::new());
        assert_eq!(mknod(&core, "/a", 0o040000 | 0o755, None, 0, 0).unwrap_err(), Error::InvalidArgument);
        assert_eq!(mknod(&core, "/b", 0o120000 | 0o777, None, 0, 0).unwrap_err(), Error::InvalidArgument);
    }
}
