//! §7.2: the single seam through which an embedder overrides the core's
//! defaults — there is no on-disk or environment configuration, since this
//! is a library rather than a standalone process.

use std::collections::BTreeSet;

use rand::Rng;

use crate::entry::FileId;

/// Generates fresh, currently-unused inode numbers.
///
/// Implementations are handed the set of file ids presently live in the
/// tree and must return one that is not in it. The default
/// [`RandomRetryAllocator`] matches the source's randomized-with-retry
/// scheme; [`SequentialAllocator`] is provided for tests that want
/// deterministic, human-readable inode numbers.
pub trait InodeAllocator: Send + Sync {
    fn allocate(&self, live: &BTreeSet<FileId>) -> FileId;
}

/// Default allocator: draw a random `u64`, retry on collision against the
/// live set. `0` (invalid) and `1` (root) are never produced.
#[derive(Default)]
pub struct RandomRetryAllocator;

impl InodeAllocator for RandomRetryAllocator {
    fn allocate(&self, live: &BTreeSet<FileId>) -> FileId {
        let mut rng = rand::thread_rng();
        loop {
            let candidate: FileId = rng.gen_range(2..=FileId::MAX);
            if !live.contains(&candidate) {
                return candidate;
            }
        }
    }
}

/// Deterministic allocator for tests: hands out `2, 3, 4, ...` in order,
/// skipping any that happen to already be live.
pub struct SequentialAllocator {
    next: std::sync::atomic::AtomicU64,
}

impl Default for SequentialAllocator {
    fn default() -> Self {
        Self {
            next: std::sync::atomic::AtomicU64::new(2),
        }
    }
}

impl InodeAllocator for SequentialAllocator {
    fn allocate(&self, live: &BTreeSet<FileId>) -> FileId {
        use std::sync::atomic::Ordering;
        loop {
            let candidate = self.next.fetch_add(1, Ordering::Relaxed);
            if !live.contains(&candidate) {
                return candidate;
            }
        }
    }
}

/// Construction-time configuration for a [`crate::core::Core`].
pub struct CoreConfig {
    /// Inode-number generator. Defaults to [`RandomRetryAllocator`].
    pub inode_allocator: Box<dyn InodeAllocator>,
    /// Maximum path component length, in bytes. Defaults to
    /// `FSKIT_FILESYSTEM_NAMEMAX` (255).
    pub name_max: usize,
    /// Mode bits for the synthesized root directory.
    pub root_mode: u32,
    pub root_uid: u32,
    pub root_gid: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            inode_allocator: Box::new(RandomRetryAllocator),
            name_max: crate::FSKIT_FILESYSTEM_NAMEMAX,
            root_mode: 0o755,
            root_uid: 0,
            root_gid: 0,
        }
    }
}

impl CoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inode_allocator(mut self, allocator: impl InodeAllocator + 'static) -> Self {
        self.inode_allocator = Box::new(allocator);
        self
    }

    pub fn with_name_max(mut self, name_max: usize) -> Self {
        self.name_max = name_max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_allocator_skips_live_ids() {
        let alloc = SequentialAllocator::default();
        let mut live = BTreeSet::new();
        live.insert(2);
        live.insert(3);
        assert_eq!(alloc.allocate(&live), 4);
    }

    #[test]
    fn random_allocator_avoids_collisions() {
        let alloc = RandomRetryAllocator;
        let mut live = BTreeSet::new();
        for i in 2..1000 {
            live.insert(i);
        }
        let id = alloc.allocate(&live);
        assert!(!live.contains(&id));
        assert!(id >= 2);
    }
}
