use crate::config::CanvasConfig;
use crate::device::GpuDevice;

use super::cache::TextureCache;
use super::handle::CacheOwner;

/// Running texture memory counters and their limits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Budget {
    pub(super) max_bytes: usize,
    pub(super) max_items: usize,
    pub(super) reserve_empty_bytes: usize,
    /// Bytes held by live handles.
    pub(super) used_bytes: usize,
    /// Bytes of every device texture the cache owns.
    pub(super) total_bytes: usize,
    /// Bytes of empty pages kept for reuse.
    pub(super) empty_bytes: usize,
    pub(super) handle_count: usize,
}

impl Budget {
    pub(super) fn new(config: &CanvasConfig) -> Self {
        Self {
            max_bytes: config.max_cache_bytes,
            max_items: config.max_cache_items,
            reserve_empty_bytes: config.reserve_empty_bytes,
            ..Self::default()
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn empty_bytes(&self) -> usize {
        self.empty_bytes
    }

    pub fn handle_count(&self) -> usize {
        self.handle_count
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl TextureCache {
    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Evicts least recently used handles until `margin` more bytes fit under
    /// the byte budget and the item budget holds. With `prune_unused_only`,
    /// unreferenced handles at the tail are evicted as well.
    ///
    /// Returns whether anything was evicted.
    pub fn prune_texture_memory(
        &mut self,
        device: &mut dyn GpuDevice,
        margin: usize,
        prune_unused_only: bool,
        unlink: &mut dyn FnMut(CacheOwner),
    ) -> bool {
        let budget = self.budget.max_bytes - margin.min(self.budget.max_bytes);
        let mut evicted = false;
        while let Some(tail) = self.lru_tail() {
            let over = self.budget.used_bytes > budget || self.budget.handle_count > self.budget.max_items;
            let unused = prune_unused_only && self.get(tail).is_some_and(|h| h.is_unreferenced());
            if !over && !unused {
                break;
            }
            if !self.evict(device, tail, unlink) {
                break;
            }
            evicted = true;
        }
        evicted
    }

    /// Evicts every handle regardless of budget or references.
    pub fn clear_all(&mut self, device: &mut dyn GpuDevice, unlink: &mut dyn FnMut(CacheOwner)) {
        let count = self.budget.handle_count;
        while let Some(tail) = self.lru_tail() {
            if !self.evict(device, tail, unlink) {
                break;
            }
        }
        log::debug!("ember-canvas: cleared {count} cached textures");
    }

    /// Destroys every empty page and drains the empty reserve.
    pub fn clear_empty_pages(&mut self, device: &mut dyn GpuDevice) {
        for id in self.page_ids() {
            if self.page(id).is_some_and(|p| p.is_empty()) {
                self.destroy_page(device, id);
            }
        }
        self.budget.empty_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::IntSize;
    use crate::device::{SoftwareDevice, SurfaceFormat};
    use crate::texture::HandleId;

    fn setup(max_bytes: usize, max_items: usize) -> (SoftwareDevice, TextureCache) {
        let config = CanvasConfig {
            max_cache_bytes: max_bytes,
            max_cache_items: max_items,
            shared_page_size: 128,
            reserve_empty_bytes: 0,
            ..CanvasConfig::default()
        };
        (SoftwareDevice::new(1024), TextureCache::new(&config, 1024))
    }

    /// A8 handle of exactly `bytes` bytes.
    fn handle(dev: &mut SoftwareDevice, cache: &mut TextureCache, bytes: i32) -> HandleId {
        cache.allocate(dev, IntSize::new(bytes, 1), SurfaceFormat::A8, false, &mut |_| {}).unwrap()
    }

    // ── byte budget ───────────────────────────────────────────────────────

    #[test]
    fn prune_evicts_least_recently_used() {
        let (mut dev, mut cache) = setup(100, 16);
        let a = handle(&mut dev, &mut cache, 60);
        let b = handle(&mut dev, &mut cache, 60);
        cache.touch(a);

        assert!(cache.prune_texture_memory(&mut dev, 0, false, &mut |_| {}));
        assert!(cache.is_valid(a));
        assert!(cache.get(b).is_none());
        assert_eq!(cache.budget().used_bytes(), 60);
        assert_eq!(cache.budget().handle_count(), 1);
    }

    #[test]
    fn margin_reserves_room_for_the_next_allocation() {
        let (mut dev, mut cache) = setup(100, 16);
        let a = handle(&mut dev, &mut cache, 30);
        let b = handle(&mut dev, &mut cache, 30);
        assert!(!cache.prune_texture_memory(&mut dev, 40, false, &mut |_| {}));
        assert!(cache.prune_texture_memory(&mut dev, 50, false, &mut |_| {}));
        assert!(cache.get(a).is_none());
        assert!(cache.is_valid(b));
        assert!(cache.budget().used_bytes() <= 50);
    }

    #[test]
    fn oversized_margin_evicts_everything() {
        let (mut dev, mut cache) = setup(100, 16);
        handle(&mut dev, &mut cache, 10);
        handle(&mut dev, &mut cache, 10);
        cache.prune_texture_memory(&mut dev, 1000, false, &mut |_| {});
        assert_eq!(cache.budget().handle_count(), 0);
        assert_eq!(cache.budget().used_bytes(), 0);
    }

    #[test]
    fn eviction_is_strict_lru() {
        let (mut dev, mut cache) = setup(50, 16);
        let ids: Vec<_> = (0..5).map(|_| handle(&mut dev, &mut cache, 20)).collect();
        cache.touch(ids[0]);
        cache.touch(ids[2]);
        // LRU order (front→back): 2, 0, 4, 3, 1
        cache.prune_texture_memory(&mut dev, 0, false, &mut |_| {});
        let live: Vec<_> = ids.iter().map(|id| cache.is_valid(*id)).collect();
        assert_eq!(live, vec![true, false, true, false, false]);
        assert_eq!(cache.budget().used_bytes(), 40);
    }

    // ── item budget ───────────────────────────────────────────────────────

    #[test]
    fn item_budget_bounds_tiny_handles() {
        let (mut dev, mut cache) = setup(1 << 20, 3);
        let ids: Vec<_> = (0..5).map(|_| handle(&mut dev, &mut cache, 1)).collect();
        cache.prune_texture_memory(&mut dev, 0, false, &mut |_| {});
        assert_eq!(cache.budget().handle_count(), 3);
        assert!(ids[..2].iter().all(|id| cache.get(*id).is_none()));
    }

    // ── unused pruning ────────────────────────────────────────────────────

    #[test]
    fn unused_pruning_stops_at_first_referenced_tail() {
        let (mut dev, mut cache) = setup(1 << 20, 16);
        let owned = handle(&mut dev, &mut cache, 4);
        let free_a = handle(&mut dev, &mut cache, 4);
        let free_b = handle(&mut dev, &mut cache, 4);
        cache.touch(owned);
        cache.set_owner(owned, Some(CacheOwner::Glyph(crate::cache::EntryId::new(0, 0))));
        cache.touch(free_b);
        // Back of the list: free_a, then owned, then free_b.

        let mut unlinked = 0;
        assert!(cache.prune_texture_memory(&mut dev, 0, true, &mut |_| unlinked += 1));
        assert!(cache.get(free_a).is_none());
        assert!(cache.is_valid(owned));
        assert!(cache.is_valid(free_b));
        assert_eq!(unlinked, 0);
    }

    // ── clearing ──────────────────────────────────────────────────────────

    #[test]
    fn clear_all_then_clear_empty_pages_releases_everything() {
        let config = CanvasConfig {
            shared_page_size: 128,
            reserve_empty_bytes: 1 << 20,
            ..CanvasConfig::default()
        };
        let mut dev = SoftwareDevice::new(1024);
        let mut cache = TextureCache::new(&config, 1024);
        for _ in 0..4 {
            handle(&mut dev, &mut cache, 8);
        }
        cache.allocate(&mut dev, IntSize::new(8, 8), SurfaceFormat::Rgba8, false, &mut |_| {}).unwrap();
        assert_eq!(cache.page_count(), 2);

        cache.clear_all(&mut dev, &mut |_| {});
        assert_eq!(cache.budget().handle_count(), 0);
        assert_eq!(cache.page_count(), 2, "emptied pages fold into the reserve");
        assert_eq!(cache.budget().empty_bytes(), cache.budget().total_bytes());

        cache.clear_empty_pages(&mut dev);
        assert_eq!(cache.page_count(), 0);
        assert_eq!(cache.budget().total_bytes(), 0);
        assert_eq!(cache.budget().empty_bytes(), 0);
        assert_eq!(dev.texture_count(), 0);
    }
}
