//! §3.3 / §4.7: file and directory handles, and the readdir cursor.
//!
//! A handle owns an `Arc<Entry>` clone, which is what keeps a tombstoned
//! entry's storage alive after it has been spliced out of its parent's
//! `EntrySet` (§9.1's resolved open question: `Arc` reference counting
//! stands in for the source's raw-pointer detached list).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::{Entry, FileId, Kind};
use crate::route::AppData;

bitflags::bitflags! {
    /// Open flags, matching the POSIX `O_*` bits this crate cares about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0;
        const WRONLY = 0o1;
        const RDWR   = 0o2;
        const CREAT  = 0o100;
        const EXCL   = 0o200;
        const TRUNC  = 0o1000;
    }
}

impl OpenFlags {
    pub fn access_mode(self) -> u32 {
        (self.bits()) & 0o3
    }

    pub fn wants_read(self) -> bool {
        matches!(self.access_mode(), 0 | 0o2)
    }

    pub fn wants_write(self) -> bool {
        matches!(self.access_mode(), 0o1 | 0o2)
    }
}

/// A live reference to an open file. Carries its own reader-writer lock per
/// §3.3; in practice callers serialize through the entry's lock for
/// attribute changes, and this lock instead protects the handle's own
/// bookkeeping (the cached `app_data`).
pub struct FileHandle {
    entry: Arc<Entry>,
    file_id: FileId,
    flags: OpenFlags,
    path: String,
    app_data: Mutex<Option<AppData>>,
}

impl FileHandle {
    pub fn new(entry: Arc<Entry>, flags: OpenFlags, path: String, app_data: Option<AppData>) -> Self {
        let file_id = entry.file_id();
        FileHandle {
            entry,
            file_id,
            flags,
            path,
            app_data: Mutex::new(app_data),
        }
    }

    pub fn entry(&self) -> &Arc<Entry> {
        &self.entry
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn app_data(&self) -> parking_lot::MutexGuard<'_, Option<AppData>> {
        self.app_data.lock()
    }
}

/// One entry as reported by readdir: `{name, kind, file_id}` (§4.7).
#[derive(Debug, Clone)]
pub struct DirEntryView {
    pub name: String,
    pub kind: Kind,
    pub file_id: FileId,
}

/// A snapshot of a directory's children at `opendir` time, plus the synthetic
/// `.`/`..` pair, used to serve `readdir` in stable batches.
struct DirSnapshot {
    entries: Vec<DirEntryView>,
}

impl DirSnapshot {
    fn capture(dir: &Arc<Entry>, parent_file_id: FileId) -> Self {
        let state = dir.read();
        let mut entries = vec![
            DirEntryView { name: ".".into(), kind: Kind::Directory, file_id: dir.file_id() },
            DirEntryView { name: "..".into(), kind: Kind::Directory, file_id: parent_file_id },
        ];
        if let Some(children) = state.children.as_ref() {
            for (name, child) in children.iter() {
                entries.push(DirEntryView {
                    name: name.to_string(),
                    kind: child.kind(),
                    file_id: child.file_id(),
                });
            }
        }
        DirSnapshot { entries }
    }
}

/// A live reference to an open directory, plus its readdir cursor (§4.7).
pub struct DirHandle {
    entry: Arc<Entry>,
    file_id: FileId,
    path: String,
    app_data: Mutex<Option<AppData>>,
    snapshot: Mutex<DirSnapshot>,
    cursor: AtomicUsize,
}

impl DirHandle {
    pub fn new(entry: Arc<Entry>, parent_file_id: FileId, path: String, app_data: Option<AppData>) -> Self {
        let file_id = entry.file_id();
        let snapshot = DirSnapshot::capture(&entry, parent_file_id);
        DirHandle {
            entry,
            file_id,
            path,
            app_data: Mutex::new(app_data),
            snapshot: Mutex::new(snapshot),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn entry(&self) -> &Arc<Entry> {
        &self.entry
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn app_data(&self) -> parking_lot::MutexGuard<'_, Option<AppData>> {
        self.app_data.lock()
    }

    /// Return up to `n` entries starting at the cursor, advancing it by the
    /// number actually returned.
    pub fn readdir(&self, n: usize) -> Vec<DirEntryView> {
        let snapshot = self.snapshot.lock();
        let start = self.cursor.load(Ordering::SeqCst);
        let end = (start + n).min(snapshot.entries.len());
        if end <= start {
            return Vec::new();
        }
        let out = snapshot.entries[start..end].to_vec();
        self.cursor.store(end, Ordering::SeqCst);
        out
    }

    /// §4.7: remove the `i`-th element of the *current snapshot* (counted
    /// from the start of the whole listing, not from the cursor), for
    /// readdir-route filtering.
    pub fn omit(&self, i: usize) {
        let mut snapshot = self.snapshot.lock();
        if i < snapshot.entries.len() {
            snapshot.entries.remove(i);
            let cursor = self.cursor.load(Ordering::SeqCst);
            if i < cursor {
                self.cursor.store(cursor - 1, Ordering::SeqCst);
            }
        }
    }

    pub fn rewinddir(&self) {
        self.cursor.store(0, Ordering::SeqCst);
    }

    pub fn telldir(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn seekdir(&self, pos: usize) {
        self.cursor.store(pos, Ordering::SeqCst);
    }
}
