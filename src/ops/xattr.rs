//! §4.5: extended attributes. An entry owns a name→bytes mapping; get/set
//! honor the POSIX `XATTR_CREATE`/`XATTR_REPLACE` flags, and a zero-capacity
//! buffer on `get`/`list` is a size query rather than a copy.

use crate::core::Core;
use crate::error::{Error, Result};
use crate::walker::LockMode;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct XattrFlags: u32 {
        /// Fail with `-EEXIST` if the attribute already exists.
        const CREATE  = 0b01;
        /// Fail with `-ENODATA` if the attribute does not already exist.
        const REPLACE = 0b10;
    }
}

/// Returns the attribute's byte count, and copies up to `out.len()` bytes
/// into it. Passing an empty `out` is the documented size-query form: the
/// full length is still returned, nothing is copied.
pub fn getxattr(core: &Core, path: &str, name: &[u8], out: &mut [u8], uid: u32, gid: u32) -> Result<usize> {
    let entry = core.resolve(path, uid, gid, LockMode::Read, None)?;
    let state = entry.read();
    let value = state.xattrs.get(name).ok_or(Error::NoAttribute)?;
    let n = value.len().min(out.len());
    out[..n].copy_from_slice(&value[..n]);
    Ok(value.len())
}

pub fn setxattr(core: &Core, path: &str, name: &[u8], value: &[u8], flags: XattrFlags, uid: u32, gid: u32) -> Result<()> {
    let entry = core.resolve(path, uid, gid, LockMode::Write, None)?;
    let mut state = entry.write();
    let exists = state.xattrs.contains_key(name);
    if exists && flags.contains(XattrFlags::CREATE) {
        return Err(Error::Exists);
    }
    if !exists && flags.contains(XattrFlags::REPLACE) {
        return Err(Error::NoAttribute);
    }
    state.xattrs.insert(name.to_vec(), value.to_vec());
    Ok(())
}

pub fn removexattr(core: &Core, path: &str, name: &[u8], uid: u32, gid: u32) -> Result<()> {
    let entry = core.resolve(path, uid, gid, LockMode::Write, None)?;
    let mut state = entry.write();
    state.xattrs.remove(name).ok_or(Error::NoAttribute)?;
    Ok(())
}

/// Returns the NUL-separated name list's total byte count and copies up to
/// `out.len()` bytes of it, same size-query convention as `getxattr`.
pub fn listxattr(core: &Core, path: &str, out: &mut [u8], uid: u32, gid: u32) -> Result<usize> {
    let entry = core.resolve(path, uid, gid, LockMode::Read, None)?;
    let state = entry.read();
    let mut joined = Vec::new();
    for name in state.xattrs.keys() {
        joined.extend_from_slice(name);
        joined.push(0);
    }
    let n = joined.len().min(out.len());
    out[..n].copy_from_slice(&joined[..n]);
    Ok(joined.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::ops::create_open::{close, create};

    fn with_file(core: &Core) {
        let h = create(core, "/t", 0o644, 0, 0).unwrap();
        close(core, h, 0, 0).unwrap();
    }

    #[test]
    fn set_create_twice_then_replace() {
        let core = Core::new(CoreConfig::new());
        with_file(&core);
        setxattr(&core, "/t", b"k", b"v1", XattrFlags::CREATE, 0, 0).unwrap();
        let err = setxattr(&core, "/t", b"k", b"v2", XattrFlags::CREATE, 0, 0).unwrap_err();
        assert_eq!(err, Error::Exists);
        setxattr(&core, "/t", b"k", b"v2", XattrFlags::REPLACE, 0, 0).unwrap();
        let mut buf = [0u8; 8];
        let n = getxattr(&core, "/t", b"k", &mut buf, 0, 0).unwrap();
        assert_eq!(&buf[..n], b"v2");
    }

    #[test]
    fn replace_without_existing_fails() {
        let core = Core::new(CoreConfig::new());
        with_file(&core);
        let err = setxattr(&core, "/t", b"k", b"v", XattrFlags::REPLACE, 0, 0).unwrap_err();
        assert_eq!(err, Error::NoAttribute);
    }

    #[test]
    fn remove_then_get_is_no_attribute() {
        let core = Core::new(CoreConfig::new());
        with_file(&core);
        setxattr(&core, "/t", b"k", b"v", XattrFlags::empty(), 0, 0).unwrap();
        removexattr(&core, "/t", b"k", 0, 0).unwrap();
        let mut buf = [0u8; 8];
        let err = getxattr(&core, "/t", b"k", &mut buf, 0, 0).unwrap_err();
        assert_eq!(err, Error::NoAttribute);
    }

    #[test]
    fn get_size_query_with_empty_buffer_reports_length_without_copying() {
        let core = Core::new(CoreConfig::new());
        with_file(&core);
        setxattr(&core, "/t", b"k", b"hello", XattrFlags::empty(), 0, 0).unwrap();
        let mut empty: [u8; 0] = [];
        let n = getxattr(&core, "/t", b"k", &mut empty, 0, 0).unwrap();
        assert_eq!(n, 5);
    }

    #[test]
    fn listxattr_joins_names_nul_separated() {
        let core = Core::new(CoreConfig::new());
        with_file(&core);
        setxattr(&core, "/t", b"a", b"1", XattrFlags::empty(), 0, 0).unwrap();
        setxattr(&core, "/t", b"b", b"2", XattrFlags::empty(), 0, 0).unwrap();
        let mut buf = [0u8; 64];
        let n = listxattr(&core, "/t", &mut buf, 0, 0).unwrap();
        let joined = &buf[..n];
        assert!(joined.split(|&b| b == 0).any(|s| s == b"a"));
        assert!(joined.split(|&b| b == 0).any(|s| s == b"b"));
    }
}
