//! A directory's child mapping: name -> child [`Entry`], hashed by the
//! 64-bit FNV-1a digest of the name so that a path-walker which has already
//! hashed a component (e.g. because it cached the hash from a previous
//! lookup) never has to re-hash it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entry::Entry;

/// FNV-1a, 64-bit. Matches the "hashed by name" requirement without pulling
/// in a hashing crate for something this small and stable.
pub fn hash_name(name: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for byte in name.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

struct Child {
    name: String,
    entry: Arc<Entry>,
}

/// Hash table keyed on [`hash_name`], chained on collision. Entries are kept
/// in insertion order within each bucket only incidentally; [`EntrySet::iter`]
/// walks buckets in hash order, which is good enough for readdir (the spec
/// only promises a *consistent* snapshot, not a particular order).
#[derive(Default)]
pub struct EntrySet {
    buckets: HashMap<u64, Vec<Child>>,
    len: usize,
}

impl EntrySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a new child. Caller must have already checked that `name`
    /// isn't present (via [`Self::find_by_name`]); inserting a duplicate
    /// name is a logic error, not a recoverable one, matching the teacher's
    /// convention of panicking on directory-consistency violations that the
    /// caller is responsible for preventing.
    pub fn insert_unique(&mut self, name: String, entry: Arc<Entry>) {
        let hash = hash_name(&name);
        let bucket = self.buckets.entry(hash).or_default();
        debug_assert!(
            !bucket.iter().any(|c| c.name == name),
            "insert_unique called with a name that already exists: {name}"
        );
        bucket.push(Child { name, entry });
        self.len += 1;
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<Entry>> {
        self.find_by_hash(hash_name(name), name)
    }

    /// Look up a child by a precomputed hash, for callers (the path walker)
    /// that already know it.
    pub fn find_by_hash(&self, hash: u64, name: &str) -> Option<Arc<Entry>> {
        self.buckets
            .get(&hash)?
            .iter()
            .find(|c| c.name == name)
            .map(|c| Arc::clone(&c.entry))
    }

    pub fn remove_by_hash(&mut self, hash: u64, name: &str) -> Option<Arc<Entry>> {
        let bucket = self.buckets.get_mut(&hash)?;
        let index = bucket.iter().position(|c| c.name == name)?;
        let removed = bucket.swap_remove(index);
        if bucket.is_empty() {
            self.buckets.remove(&hash);
        }
        self.len -= 1;
        Some(removed.entry)
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<Arc<Entry>> {
        self.remove_by_hash(hash_name(name), name)
    }

    /// Ordered iteration for readdir: `(name, entry)` pairs. The order is
    /// stable across calls as long as the set isn't mutated, which is all
    /// readdir's consistent-snapshot requirement (§4.7) needs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Entry>)> {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.iter())
            .map(|c| (c.name.as_str(), &c.entry))
    }
}
