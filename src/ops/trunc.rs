//! §4.5: `truncate`/`ftruncate`. The core never invents bytes on grow —
//! zero-filling, if any, is the consumer's responsibility inside the
//! `trunc` route.

use crate::core::Core;
use crate::entry::Timestamp;
use crate::error::Result;
use crate::handle::FileHandle;
use crate::route::{RouteContext, TruncArgs};
use crate::walker::LockMode;

pub fn truncate(core: &Core, path: &str, new_size: u64, uid: u32, gid: u32) -> Result<()> {
    let entry = core.resolve(path, uid, gid, LockMode::Write, None)?;
    let file_id = entry.file_id();
    let ctx = RouteContext { path, file_id, uid, gid };
    core.routes().read().dispatch_trunc(ctx, TruncArgs { new_size })?;
    let mut state = entry.write();
    state.size = new_size;
    state.mtime = Timestamp::now();
    Ok(())
}

pub fn ftruncate(core: &Core, handle: &FileHandle, new_size: u64, uid: u32, gid: u32) -> Result<()> {
    let file_id = handle.file_id();
    let ctx = RouteContext { path: handle.path(), file_id, uid, gid };
    core.routes().read().dispatch_trunc(ctx, TruncArgs { new_size })?;
    let mut state = handle.entry().write();
    state.size = new_size;
    state.mtime = Timestamp::now();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::ops::create_open::create;
    use crate::route::ConcurrencyMode;

    #[test]
    fn truncate_updates_size_and_mtime() {
        let core = Core::new(CoreConfig::new());
        let h = create(&core, "/a", 0o644, 0, 0).unwrap();
        let before = h.entry().stat().mtime;
        std::thread::sleep(std::time::Duration::from_millis(2));
        truncate(&core, "/a", 42, 0, 0).unwrap();
        let st = h.entry().stat();
        assert_eq!(st.size, 42);
        assert!(st.mtime >= before);
    }

    #[test]
    fn ftruncate_runs_trunc_route() {
        let core = Core::new(CoreConfig::new());
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
        {
            let seen = std::sync::Arc::clone(&seen);
            core.routes()
                .write()
                .register_trunc("^/.*$", ConcurrencyMode::Concurrent, move |_ctx, args| {
                    seen.store(args.new_size, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        let h = create(&core, "/a", 0o644, 0, 0).unwrap();
        ftruncate(&core, &h, 7, 0, 0).unwrap();
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 7);
        assert_eq!(h.entry().stat().size, 7);
    }
}
