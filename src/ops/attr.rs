//! §4.5: `stat`, `access`, `chmod`, `chown`, `utime`.

use crate::core::Core;
use crate::entry::{check_permission, Stat, Timestamp};
use crate::error::{Error, Result};
use crate::walker::LockMode;

bitflags::bitflags! {
    /// Mask argument to [`access`]: any combination of read/write/execute.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMask: u32 {
        const READ    = super::R_OK;
        const WRITE   = super::W_OK;
        const EXECUTE = super::X_OK;
    }
}

pub fn stat(core: &Core, path: &str, uid: u32, gid: u32) -> Result<Stat> {
    let entry = core.resolve(path, uid, gid, LockMode::Read, None)?;
    Ok(entry.stat())
}

/// Resolves `path` read-locked and checks `mask` against the entry's mode
/// and the caller's `(uid, gid)`. Root always passes: bypassing the check
/// entirely (or running it for non-root too) is a property of the
/// kernel-bridge's three orthogonal flags (§6.2), not of this crate, which
/// always enforces whatever mask it's given.
pub fn access(core: &Core, path: &str, uid: u32, gid: u32, mask: AccessMask) -> Result<()> {
    let entry = core.resolve(path, uid, gid, LockMode::Read, None)?;
    let state = entry.read();
    if !check_permission(state.mode, state.uid, state.gid, uid, gid, mask.bits()) {
        return Err(Error::PermissionDenied);
    }
    Ok(())
}

/// Caller must own the entry or be root (§4.5).
pub fn chmod(core: &Core, path: &str, mode: u32, uid: u32, gid: u32) -> Result<()> {
    let entry = core.resolve(path, uid, gid, LockMode::Write, None)?;
    let mut state = entry.write();
    if uid != 0 && uid != state.uid {
        return Err(Error::NotPermitted);
    }
    state.mode = mode;
    state.ctime = Timestamp::now();
    Ok(())
}

/// Caller must be root; `-1` (as `u32::MAX`, its two's-complement
/// equivalent for `uid_t`) for either new id leaves it unchanged (§4.5).
pub fn chown(core: &Core, path: &str, uid: u32, gid: u32, new_uid: u32, new_gid: u32) -> Result<()> {
    if uid != 0 {
        return Err(Error::NotPermitted);
    }
    let entry = core.resolve(path, uid, gid, LockMode::Write, None)?;
    let mut state = entry.write();
    if new_uid != u32::MAX {
        state.uid = new_uid;
    }
    if new_gid != u32::MAX {
        state.gid = new_gid;
    }
    state.ctime = Timestamp::now();
    Ok(())
}

/// Sets the given timestamps verbatim; the "now" sentinel, if any, is the
/// wrapper's concern, not the core's (§4.5).
pub fn utime(core: &Core, path: &str, atime: Timestamp, mtime: Timestamp, uid: u32, gid: u32) -> Result<()> {
    let entry = core.resolve(path, uid, gid, LockMode::Write, None)?;
    let mut state = entry.write();
    if uid != 0 && uid != state.uid {
        return Err(Error::NotPermitted);
    }
    state.atime = atime;
    state.mtime = mtime;
    state.ctime = Timestamp::now();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::ops::create_open::{close, create};

    #[test]
    fn stat_reports_mode_and_owner() {
        let core = Core::new(CoreConfig::new());
        let h = create(&core, "/a", 0o644, 7, 9).unwrap();
        close(&core, h, 7, 9).unwrap();
        let st = stat(&core, "/a", 0, 0).unwrap();
        assert_eq!(st.uid, 7);
        assert_eq!(st.gid, 9);
        assert_eq!(st.nlink, 1);
    }

    #[test]
    fn access_denies_without_permission() {
        let core = Core::new(CoreConfig::new());
        let h = create(&core, "/a", 0o600, 1, 1).unwrap();
        close(&core, h, 1, 1).unwrap();
        assert!(access(&core, "/a", 2, 2, AccessMask::READ).is_err());
        assert!(access(&core, "/a", 1, 1, AccessMask::READ | AccessMask::WRITE).is_ok());
    }

    #[test]
    fn chmod_by_non_owner_non_root_is_not_permitted() {
        let core = Core::new(CoreConfig::new());
        let h = create(&core, "/a", 0o644, 1, 1).unwrap();
        close(&core, h, 1, 1).unwrap();
        let err = chmod(&core, "/a", 0o600, 2, 2).unwrap_err();
        assert_eq!(err, Error::NotPermitted);
        assert!(chmod(&core, "/a", 0o600, 1, 1).is_ok());
    }

    #[test]
    fn chown_requires_root() {
        let core = Core::new(CoreConfig::new());
        let h = create(&core, "/a", 0o644, 1, 1).unwrap();
        close(&core, h, 1, 1).unwrap();
        assert_eq!(chown(&core, "/a", 1, 1, 2, 2).unwrap_err(), Error::NotPermitted);
        chown(&core, "/a", 0, 0, 2, 2).unwrap();
        let st = stat(&core, "/a", 0, 0).unwrap();
        assert_eq!(st.uid, 2);
        assert_eq!(st.gid, 2);
    }

    #[test]
    fn chown_leaves_unset_id_unchanged() {
        let core = Core::new(CoreConfig::new());
        let h = create(&core, "/a", 0o644, 1, 1).unwrap();
        close(&core, h, 1, 1).unwrap();
        chown(&core, "/a", 0, 0, u32::MAX, 5).unwrap();
        let st = stat(&core, "/a", 0, 0).unwrap();
        assert_eq!(st.uid, 1);
        assert_eq!(st.gid, 5);
    }

    #[test]
    fn utime_sets_timestamps_verbatim() {
        let core = Core::new(CoreConfig::new());
        let h = create(&core, "/a", 0o644, 1, 1).unwrap();
        close(&core, h, 1, 1).unwrap();
        let ts = Timestamp { secs: 123, nanos: 456 };
        utime(&core, "/a", ts, ts, 1, 1).unwrap();
        let st = stat(&core, "/a", 0, 0).unwrap();
        assert_eq!(st.atime, ts);
        assert_eq!(st.mtime, ts);
    }
}
