//! Content-addressed caches.
//!
//! A [`ContentCache`] maps expensive-to-produce content (rasterized paths,
//! glyph runs) to texture handles and vertex ranges. Keys are bucketed by a
//! 64-bit hash over their exactly-compared fields; a lookup only hits when
//! [`CacheKey::matches`] accepts the stored key as well.

mod glyph_key;
mod path_key;

pub use glyph_key::{placed_glyphs, quant_scale, quantize_run, GlyphCacheKey};
pub use path_key::{PathCacheKey, PatternKey, PatternSource};

use core::hash::{BuildHasher, Hash};

use hashbrown::HashMap;

use crate::device::VertexRange;
use crate::texture::HandleId;

/// Rasterized path cache.
pub type PathCache = ContentCache<PathCacheKey>;
/// Rasterized glyph run cache.
pub type GlyphCache = ContentCache<GlyphCacheKey>;

/// Lookup key of a content cache.
pub trait CacheKey {
    /// Hash over the fields [`matches`](Self::matches) compares exactly.
    fn content_hash(&self) -> u64;

    /// Full comparison: may `stored` be reused for `query`?
    ///
    /// Not necessarily symmetric; fuzzy and containment checks are allowed.
    fn matches(stored: &Self, query: &Self) -> bool;
}

/// Hashes `value` with a fixed seed so equal content hashes equally in every
/// cache instance.
pub(crate) fn hash_content<T: Hash + ?Sized>(value: &T) -> u64 {
    foldhash::fast::FixedState::with_seed(0x656d_6265_72).hash_one(value)
}

/// Generational index of a cache entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct EntryId {
    index: u32,
    generation: u32,
}

impl EntryId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

#[derive(Debug)]
pub struct Entry<K> {
    pub(crate) key: K,
    hash: u64,
    handle: Option<HandleId>,
    vertex_range: Option<VertexRange>,
}

impl<K> Entry<K> {
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub fn handle(&self) -> Option<HandleId> {
        self.handle
    }

    #[inline]
    pub fn vertex_range(&self) -> Option<VertexRange> {
        self.vertex_range
    }

    /// True when the entry holds neither pixels nor vertices.
    #[inline]
    pub fn is_detached(&self) -> bool {
        self.handle.is_none() && self.vertex_range.is_none()
    }
}

struct Slot<K> {
    generation: u32,
    entry: Option<Entry<K>>,
}

/// Hash-bucketed cache of `K` → optional handle and vertex range.
pub struct ContentCache<K> {
    slots: Vec<Slot<K>>,
    free_slots: Vec<u32>,
    chains: HashMap<u64, Vec<u32>>,
    len: usize,
}

impl<K> Default for ContentCache<K> {
    fn default() -> Self {
        Self { slots: Vec::new(), free_slots: Vec::new(), chains: HashMap::new(), len: 0 }
    }
}

impl<K: CacheKey> ContentCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn id_at(&self, index: u32) -> EntryId {
        EntryId { index, generation: self.slots[index as usize].generation }
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry<K>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    /// Mutable access for refreshing non-hashed key fields.
    pub(crate) fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry<K>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    pub fn find(&self, key: &K) -> Option<EntryId> {
        self.find_hashed(key, key.content_hash())
    }

    fn find_hashed(&self, key: &K, hash: u64) -> Option<EntryId> {
        let chain = self.chains.get(&hash)?;
        chain.iter().copied().find_map(|index| {
            let entry = self.slots[index as usize].entry.as_ref()?;
            K::matches(&entry.key, key).then(|| self.id_at(index))
        })
    }

    /// Adds an entry without a handle. Does not check for duplicates.
    pub fn insert(&mut self, key: K) -> EntryId {
        let hash = key.content_hash();
        self.insert_hashed(key, hash)
    }

    fn insert_hashed(&mut self, key: K, hash: u64) -> EntryId {
        let entry = Entry { key, hash, handle: None, vertex_range: None };
        let index = match self.free_slots.pop() {
            Some(index) => {
                self.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot { generation: 0, entry: Some(entry) });
                (self.slots.len() - 1) as u32
            }
        };
        // Newest first: recent content is the likeliest to be drawn again.
        self.chains.entry(hash).or_default().insert(0, index);
        self.len += 1;
        self.id_at(index)
    }

    /// Returns the matching entry, or a fresh one and `true`.
    pub fn find_or_insert(&mut self, key: K) -> (EntryId, bool) {
        let hash = key.content_hash();
        match self.find_hashed(&key, hash) {
            Some(id) => (id, false),
            None => (self.insert_hashed(key, hash), true),
        }
    }

    /// Attaches `handle`, returning the one it replaces.
    pub fn link(&mut self, id: EntryId, handle: HandleId) -> Option<HandleId> {
        self.get_mut(id)?.handle.replace(handle)
    }

    /// Detaches the handle without destroying the entry.
    pub fn unlink(&mut self, id: EntryId) -> Option<HandleId> {
        self.get_mut(id)?.handle.take()
    }

    pub fn set_vertex_range(&mut self, id: EntryId, range: Option<VertexRange>) {
        if let Some(entry) = self.get_mut(id) {
            entry.vertex_range = range;
        }
    }

    /// Forgets every vertex range (the vertex buffer was orphaned).
    pub fn clear_vertex_ranges(&mut self) {
        for entry in self.slots.iter_mut().filter_map(|s| s.entry.as_mut()) {
            entry.vertex_range = None;
        }
    }

    /// Destroys an entry. Its handle, if any, is returned for eviction.
    pub fn remove(&mut self, id: EntryId) -> Option<Entry<K>> {
        self.get(id)?;
        let slot = &mut self.slots[id.index as usize];
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(id.index);
        self.len -= 1;
        if let Some(chain) = self.chains.get_mut(&entry.hash) {
            chain.retain(|&i| i != id.index);
            if chain.is_empty() {
                self.chains.remove(&entry.hash);
            }
        }
        Some(entry)
    }

    /// Once the cache holds more than `max_entries`, removes every entry
    /// without a handle or vertex range. Returns how many were removed.
    pub fn purge_detached(&mut self, max_entries: usize) -> usize {
        if self.len <= max_entries {
            return 0;
        }
        let detached: Vec<EntryId> = (0..self.slots.len() as u32)
            .filter(|&i| self.slots[i as usize].entry.as_ref().is_some_and(Entry::is_detached))
            .map(|i| self.id_at(i))
            .collect();
        for id in &detached {
            self.remove(*id);
        }
        detached.len()
    }

    /// Handles of every entry, for bulk teardown.
    pub fn handles(&self) -> Vec<HandleId> {
        self.slots.iter().filter_map(|s| s.entry.as_ref()?.handle).collect()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_slots.clear();
        self.chains.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Key whose hash only sees `bucket`, so collisions are easy to build.
    #[derive(Debug, Clone, PartialEq)]
    struct TestKey {
        bucket: u32,
        value: u32,
        tolerance: u32,
    }

    impl CacheKey for TestKey {
        fn content_hash(&self) -> u64 {
            hash_content(&self.bucket)
        }

        fn matches(stored: &Self, query: &Self) -> bool {
            stored.bucket == query.bucket && stored.value.abs_diff(query.value) <= stored.tolerance
        }
    }

    fn key(bucket: u32, value: u32) -> TestKey {
        TestKey { bucket, value, tolerance: 0 }
    }

    fn handle(index: u32) -> HandleId {
        HandleId { index, generation: 0 }
    }

    // ── lookup ────────────────────────────────────────────────────────────

    #[test]
    fn equal_keys_share_an_entry() {
        let mut cache = ContentCache::new();
        let (a, inserted_a) = cache.find_or_insert(key(1, 10));
        let (b, inserted_b) = cache.find_or_insert(key(1, 10));
        assert!(inserted_a);
        assert!(!inserted_b);
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn hash_collision_without_match_is_a_miss() {
        let mut cache = ContentCache::new();
        let (a, _) = cache.find_or_insert(key(1, 10));
        let (b, inserted) = cache.find_or_insert(key(1, 11));
        assert!(inserted);
        assert_ne!(a, b);
        assert_eq!(cache.get(a).unwrap().hash(), cache.get(b).unwrap().hash());
        assert_eq!(cache.find(&key(1, 12)), None);
    }

    #[test]
    fn fuzzy_match_uses_stored_key() {
        let mut cache = ContentCache::new();
        let stored = cache.insert(TestKey { bucket: 2, value: 100, tolerance: 5 });
        assert_eq!(cache.find(&key(2, 104)), Some(stored));
        assert_eq!(cache.find(&key(2, 106)), None);
    }

    // ── handles ───────────────────────────────────────────────────────────

    #[test]
    fn link_and_unlink_keep_the_entry() {
        let mut cache = ContentCache::new();
        let id = cache.insert(key(0, 0));
        assert_eq!(cache.link(id, handle(7)), None);
        assert_eq!(cache.link(id, handle(8)), Some(handle(7)));
        assert_eq!(cache.unlink(id), Some(handle(8)));
        assert_eq!(cache.unlink(id), None);
        assert!(cache.get(id).is_some());
    }

    #[test]
    fn removed_ids_go_stale() {
        let mut cache = ContentCache::new();
        let id = cache.insert(key(3, 3));
        cache.link(id, handle(1));
        let entry = cache.remove(id).unwrap();
        assert_eq!(entry.handle(), Some(handle(1)));
        assert!(cache.get(id).is_none());
        assert_eq!(cache.unlink(id), None);
        assert!(cache.remove(id).is_none());

        let reused = cache.insert(key(4, 4));
        assert_eq!(reused.index, id.index);
        assert!(cache.get(id).is_none());
        assert_eq!(cache.find(&key(3, 3)), None);
    }

    // ── vertex ranges ─────────────────────────────────────────────────────

    #[test]
    fn clear_vertex_ranges_resets_all() {
        let mut cache = ContentCache::new();
        let a = cache.insert(key(0, 1));
        let b = cache.insert(key(0, 2));
        cache.set_vertex_range(a, Some(VertexRange { offset: 0, count: 6 }));
        cache.set_vertex_range(b, Some(VertexRange { offset: 6, count: 12 }));
        cache.clear_vertex_ranges();
        assert_eq!(cache.get(a).unwrap().vertex_range(), None);
        assert_eq!(cache.get(b).unwrap().vertex_range(), None);
    }

    // ── purging ───────────────────────────────────────────────────────────

    #[test]
    fn purge_only_past_cap_and_only_detached() {
        let mut cache = ContentCache::new();
        let kept_handle = cache.insert(key(0, 0));
        cache.link(kept_handle, handle(0));
        let kept_range = cache.insert(key(0, 1));
        cache.set_vertex_range(kept_range, Some(VertexRange { offset: 0, count: 3 }));
        let detached = cache.insert(key(0, 2));

        assert_eq!(cache.purge_detached(3), 0);
        assert_eq!(cache.purge_detached(2), 1);
        assert!(cache.get(detached).is_none());
        assert!(cache.get(kept_handle).is_some());
        assert!(cache.get(kept_range).is_some());
        assert_eq!(cache.len(), 2);
    }
}
