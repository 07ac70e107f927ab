use hashbrown::HashSet;

use crate::config::CanvasConfig;
use crate::coords::{IntPoint, IntRect, IntSize};
use crate::device::{DeviceError, GpuDevice, SurfaceFormat, TextureId};
use crate::surface::SurfaceLink;

use super::budget::Budget;
use super::handle::{Backing, CacheOwner, HandleId, HandleKind, PageId, TextureHandle};
use super::page::SharedPage;

struct Slot {
    generation: u32,
    handle: Option<TextureHandle>,
    prev: Option<u32>,
    next: Option<u32>,
}

/// Owner of all cached texture memory: shared atlas pages, standalone
/// textures and the handles carved out of them.
///
/// Handles live in a generational arena threaded by one LRU list (front is
/// most recently used). Byte and item counters change together with list
/// membership.
pub struct TextureCache {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,

    pages: Vec<Option<SharedPage>>,
    standalone: HashSet<TextureId>,
    page_size: i32,

    pub(super) budget: Budget,
}

impl TextureCache {
    pub fn new(config: &CanvasConfig, max_texture_size: i32) -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            head: None,
            tail: None,
            pages: Vec::new(),
            standalone: HashSet::new(),
            page_size: config.shared_page_size.min(max_texture_size).max(1),
            budget: Budget::new(config),
        }
    }

    #[inline]
    pub fn page_size(&self) -> i32 {
        self.page_size
    }

    // ── arena ─────────────────────────────────────────────────────────────

    pub fn get(&self, id: HandleId) -> Option<&TextureHandle> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.handle.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: HandleId) -> Option<&mut TextureHandle> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.handle.as_mut()
    }

    /// True for a live handle whose pixels are usable.
    pub fn is_valid(&self, id: HandleId) -> bool {
        self.get(id).is_some_and(TextureHandle::is_valid)
    }

    pub fn backing(&self, id: HandleId) -> Option<Backing> {
        let handle = self.get(id)?;
        let (texture, texture_size) = match handle.kind {
            HandleKind::Shared { page, .. } => {
                let page = self.page(page)?;
                (page.texture, page.size())
            }
            HandleKind::Standalone { texture, size } => (texture, size),
        };
        Some(Backing { texture, bounds: handle.bounds(), texture_size, format: handle.format })
    }

    pub(crate) fn set_owner(&mut self, id: HandleId, owner: Option<CacheOwner>) {
        if let Some(h) = self.get_mut(id) {
            h.owner = owner;
        }
    }

    pub(crate) fn set_surface(&mut self, id: HandleId, surface: Option<SurfaceLink>) {
        if let Some(h) = self.get_mut(id) {
            h.surface = surface;
        }
    }

    pub(crate) fn set_sampling_offset(&mut self, id: HandleId, offset: IntPoint) {
        if let Some(h) = self.get_mut(id) {
            h.sampling_offset = offset;
        }
    }

    fn insert_handle(&mut self, handle: TextureHandle) -> HandleId {
        self.budget.used_bytes += handle.used_bytes;
        self.budget.handle_count += 1;
        let index = match self.free_slots.pop() {
            Some(index) => {
                self.slots[index as usize].handle = Some(handle);
                index
            }
            None => {
                self.slots.push(Slot { generation: 0, handle: Some(handle), prev: None, next: None });
                (self.slots.len() - 1) as u32
            }
        };
        self.push_front(index);
        HandleId { index, generation: self.slots[index as usize].generation }
    }

    fn take_handle(&mut self, index: u32) -> Option<TextureHandle> {
        let handle = self.slots.get_mut(index as usize)?.handle.take()?;
        self.unlink(index);
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(index);
        Some(handle)
    }

    // ── LRU list ──────────────────────────────────────────────────────────

    fn push_front(&mut self, index: u32) {
        let old_head = self.head;
        {
            let slot = &mut self.slots[index as usize];
            slot.prev = None;
            slot.next = old_head;
        }
        match old_head {
            Some(h) => self.slots[h as usize].prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
    }

    fn unlink(&mut self, index: u32) {
        let (prev, next) = {
            let slot = &mut self.slots[index as usize];
            (slot.prev.take(), slot.next.take())
        };
        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n as usize].prev = prev,
            None => self.tail = prev,
        }
    }

    /// Marks a handle as just used. Stale ids are ignored.
    pub fn touch(&mut self, id: HandleId) {
        if self.get(id).is_none() || self.head == Some(id.index) {
            return;
        }
        self.unlink(id.index);
        self.push_front(id.index);
    }

    pub(super) fn lru_tail(&self) -> Option<HandleId> {
        let index = self.tail?;
        Some(HandleId { index, generation: self.slots[index as usize].generation })
    }

    /// Live handles, most recently used first.
    pub fn lru_order(&self) -> Vec<HandleId> {
        let mut out = Vec::with_capacity(self.budget.handle_count);
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let slot = &self.slots[index as usize];
            out.push(HandleId { index, generation: slot.generation });
            cursor = slot.next;
        }
        out
    }

    // ── pages ─────────────────────────────────────────────────────────────

    pub(crate) fn page(&self, id: PageId) -> Option<&SharedPage> {
        self.pages.get(id.0 as usize)?.as_ref()
    }

    pub fn page_count(&self) -> usize {
        self.pages.iter().flatten().count()
    }

    pub fn standalone_count(&self) -> usize {
        self.standalone.len()
    }

    fn create_page(&mut self, device: &mut dyn GpuDevice, format: SurfaceFormat) -> Result<PageId, DeviceError> {
        let size = IntSize::new(self.page_size, self.page_size);
        let texture = device.create_texture(size, format)?;
        if let Err(err) = device.upload(texture, IntPoint::default(), size, None, 0) {
            device.delete_texture(texture);
            return Err(err);
        }
        let page = SharedPage::new(texture, self.page_size, format);
        self.budget.total_bytes += page.bytes();
        log::debug!(
            "ember-canvas: created {format:?} page {}x{} ({} pages)",
            self.page_size,
            self.page_size,
            self.page_count() + 1
        );
        let id = match self.pages.iter().position(Option::is_none) {
            Some(i) => {
                self.pages[i] = Some(page);
                i
            }
            None => {
                self.pages.push(Some(page));
                self.pages.len() - 1
            }
        };
        Ok(PageId(id as u32))
    }

    pub(super) fn destroy_page(&mut self, device: &mut dyn GpuDevice, id: PageId) {
        let Some(page) = self.pages.get_mut(id.0 as usize).and_then(Option::take) else { return };
        device.delete_texture(page.texture);
        self.budget.total_bytes -= page.bytes();
        log::debug!("ember-canvas: destroyed {:?} page ({} pages)", page.format, self.page_count());
    }

    pub(super) fn page_ids(&self) -> Vec<PageId> {
        (0..self.pages.len() as u32).map(PageId).filter(|id| self.page(*id).is_some()).collect()
    }

    // ── allocation ────────────────────────────────────────────────────────

    /// True when content of this size and update behavior goes to an atlas page.
    pub fn fits_shared(&self, size: IntSize, standalone: bool) -> bool {
        !standalone && size.max_dim() <= self.page_size / 2
    }

    /// Allocates texture memory for `size` texels of `format`.
    ///
    /// The new handle is valid, unowned and at the front of the LRU list.
    /// Callers prune before allocating; this only evicts when the device
    /// itself reports exhaustion.
    pub fn allocate(
        &mut self,
        device: &mut dyn GpuDevice,
        size: IntSize,
        format: SurfaceFormat,
        standalone: bool,
        unlink: &mut dyn FnMut(CacheOwner),
    ) -> Result<HandleId, DeviceError> {
        if size.is_empty() || size.max_dim() > device.caps().max_texture_size {
            return Err(DeviceError::InvalidRegion);
        }
        let format = format.storage();

        if self.fits_shared(size, standalone) {
            for id in self.page_ids() {
                if let Some(bounds) = self.allocate_in_page(id, size, format) {
                    return Ok(self.insert_handle(TextureHandle::new(HandleKind::Shared { page: id, bounds }, format)));
                }
            }
            let page = self.with_eviction(device, unlink, |cache, device| cache.create_page(device, format))?;
            let Some(bounds) = self.allocate_in_page(page, size, format) else {
                return Err(DeviceError::InvalidRegion);
            };
            return Ok(self.insert_handle(TextureHandle::new(HandleKind::Shared { page, bounds }, format)));
        }

        let texture = self.with_eviction(device, unlink, |_, device| device.create_texture(size, format))?;
        self.standalone.insert(texture);
        let handle = TextureHandle::new(HandleKind::Standalone { texture, size }, format);
        self.budget.total_bytes += handle.used_bytes;
        Ok(self.insert_handle(handle))
    }

    fn allocate_in_page(&mut self, id: PageId, size: IntSize, format: SurfaceFormat) -> Option<IntRect> {
        let page = self.pages.get_mut(id.0 as usize)?.as_mut()?;
        if page.format != format {
            return None;
        }
        let was_empty = page.is_empty();
        let bounds = page.allocate(size)?;
        if was_empty {
            // Reserved pages are empty; fresh pages were never reserved.
            self.budget.empty_bytes = self.budget.empty_bytes.saturating_sub(page.bytes());
        }
        Some(bounds)
    }

    /// Runs `create`, evicting from the LRU tail and retrying while the
    /// device reports out-of-memory.
    fn with_eviction<T>(
        &mut self,
        device: &mut dyn GpuDevice,
        unlink: &mut dyn FnMut(CacheOwner),
        mut create: impl FnMut(&mut Self, &mut dyn GpuDevice) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        loop {
            match create(self, device) {
                Err(DeviceError::OutOfMemory) => {
                    let evicted = match self.lru_tail() {
                        Some(tail) => self.evict(device, tail, unlink),
                        None => false,
                    };
                    if !evicted && !self.drop_one_empty_page(device) {
                        return Err(DeviceError::OutOfMemory);
                    }
                }
                result => return result,
            }
        }
    }

    fn drop_one_empty_page(&mut self, device: &mut dyn GpuDevice) -> bool {
        let Some(id) = self.page_ids().into_iter().find(|id| self.page(*id).is_some_and(SharedPage::is_empty)) else {
            return false;
        };
        if let Some(page) = self.page(id) {
            self.budget.empty_bytes = self.budget.empty_bytes.saturating_sub(page.bytes());
        }
        self.destroy_page(device, id);
        true
    }

    // ── eviction ──────────────────────────────────────────────────────────

    /// Destroys a handle and returns its memory. Stale ids are a no-op.
    ///
    /// The handle is invalidated before its owner and surface links are
    /// cleared and before any memory is released.
    pub fn evict(&mut self, device: &mut dyn GpuDevice, id: HandleId, unlink: &mut dyn FnMut(CacheOwner)) -> bool {
        let Some(handle) = self.get_mut(id) else { return false };
        handle.invalidate();
        if let Some(owner) = handle.owner.take() {
            unlink(owner);
        }
        if let Some(surface) = handle.surface.take() {
            surface.detach(id);
        }

        let Some(handle) = self.take_handle(id.index) else { return false };
        match handle.kind {
            HandleKind::Shared { page, bounds } => self.release_region(device, page, bounds),
            HandleKind::Standalone { texture, .. } => {
                device.delete_texture(texture);
                self.standalone.remove(&texture);
                self.budget.total_bytes -= handle.used_bytes;
            }
        }
        self.budget.used_bytes -= handle.used_bytes;
        self.budget.handle_count -= 1;
        log::trace!("ember-canvas: evicted {:?} ({} bytes)", id, handle.used_bytes);
        true
    }

    fn release_region(&mut self, device: &mut dyn GpuDevice, id: PageId, bounds: IntRect) {
        let Some(page) = self.pages.get_mut(id.0 as usize).and_then(Option::as_mut) else { return };
        if !page.free(bounds) || !page.is_empty() {
            return;
        }
        let bytes = page.bytes();
        if self.budget.empty_bytes + bytes <= self.budget.reserve_empty_bytes {
            self.budget.empty_bytes += bytes;
        } else {
            self.destroy_page(device, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;

    fn config(page: i32) -> CanvasConfig {
        CanvasConfig {
            shared_page_size: page,
            max_cache_bytes: 1 << 20,
            reserve_empty_bytes: 0,
            ..CanvasConfig::default()
        }
    }

    fn alloc(cache: &mut TextureCache, dev: &mut SoftwareDevice, w: i32, h: i32) -> HandleId {
        cache.allocate(dev, IntSize::new(w, h), SurfaceFormat::A8, false, &mut |_| {}).unwrap()
    }

    // ── allocation ────────────────────────────────────────────────────────

    #[test]
    fn small_content_shares_a_page() {
        let mut dev = SoftwareDevice::new(1024);
        let mut cache = TextureCache::new(&config(128), 1024);
        let a = alloc(&mut cache, &mut dev, 16, 16);
        let b = alloc(&mut cache, &mut dev, 16, 16);
        assert_eq!(cache.page_count(), 1);
        let (ba, bb) = (cache.backing(a).unwrap(), cache.backing(b).unwrap());
        assert_eq!(ba.texture, bb.texture);
        assert!(!ba.bounds.intersects(bb.bounds));
        assert_eq!(cache.budget.used_bytes, 2 * 256);
        assert_eq!(cache.budget.total_bytes, 128 * 128);
    }

    #[test]
    fn large_or_forced_content_is_standalone() {
        let mut dev = SoftwareDevice::new(1024);
        let mut cache = TextureCache::new(&config(128), 1024);
        let big = alloc(&mut cache, &mut dev, 65, 10);
        let forced = cache.allocate(&mut dev, IntSize::new(8, 8), SurfaceFormat::Rgba8, true, &mut |_| {}).unwrap();
        assert_eq!(cache.page_count(), 0);
        assert_eq!(cache.standalone_count(), 2);
        assert!(matches!(cache.get(big).unwrap().kind(), HandleKind::Standalone { .. }));
        assert_eq!(cache.backing(forced).unwrap().bounds, IntRect::new(0, 0, 8, 8));
    }

    #[test]
    fn formats_use_separate_pages() {
        let mut dev = SoftwareDevice::new(1024);
        let mut cache = TextureCache::new(&config(128), 1024);
        let a = alloc(&mut cache, &mut dev, 8, 8);
        let b = cache.allocate(&mut dev, IntSize::new(8, 8), SurfaceFormat::Rgbx8, false, &mut |_| {}).unwrap();
        assert_eq!(cache.page_count(), 2);
        assert_eq!(cache.get(b).unwrap().format(), SurfaceFormat::Rgba8);
        assert_ne!(cache.backing(a).unwrap().texture, cache.backing(b).unwrap().texture);
    }

    #[test]
    fn page_size_is_capped_by_device() {
        let cache = TextureCache::new(&config(4096), 512);
        assert_eq!(cache.page_size(), 512);
    }

    #[test]
    fn device_oom_evicts_lru_and_retries() {
        let mut dev = SoftwareDevice::new(1024).with_memory_limit(2 * 100 * 100);
        let mut cache = TextureCache::new(&config(128), 1024);
        let a = alloc(&mut cache, &mut dev, 100, 100);
        let b = alloc(&mut cache, &mut dev, 100, 100);
        let c = alloc(&mut cache, &mut dev, 100, 100);
        assert!(cache.get(a).is_none());
        assert!(cache.is_valid(b) && cache.is_valid(c));
    }

    // ── LRU ───────────────────────────────────────────────────────────────

    #[test]
    fn touch_moves_to_front() {
        let mut dev = SoftwareDevice::new(1024);
        let mut cache = TextureCache::new(&config(128), 1024);
        let a = alloc(&mut cache, &mut dev, 4, 4);
        let b = alloc(&mut cache, &mut dev, 4, 4);
        let c = alloc(&mut cache, &mut dev, 4, 4);
        assert_eq!(cache.lru_order(), vec![c, b, a]);
        cache.touch(a);
        assert_eq!(cache.lru_order(), vec![a, c, b]);
        cache.touch(b);
        assert_eq!(cache.lru_order(), vec![b, a, c]);
    }

    // ── eviction ──────────────────────────────────────────────────────────

    #[test]
    fn eviction_unlinks_owner_and_stales_id() {
        let mut dev = SoftwareDevice::new(1024);
        let mut cache = TextureCache::new(&config(128), 1024);
        let a = alloc(&mut cache, &mut dev, 4, 4);
        let owner = CacheOwner::Path(crate::cache::EntryId::new(3, 0));
        cache.set_owner(a, Some(owner));

        let mut unlinked = Vec::new();
        assert!(cache.evict(&mut dev, a, &mut |o| unlinked.push(o)));
        assert_eq!(unlinked, vec![owner]);
        assert!(cache.get(a).is_none());
        assert!(!cache.is_valid(a));

        let b = alloc(&mut cache, &mut dev, 4, 4);
        assert_eq!(b.index, a.index);
        assert!(cache.get(a).is_none(), "stale id must not resolve to the reused slot");
    }

    #[test]
    fn evicting_stale_handle_is_noop() {
        let mut dev = SoftwareDevice::new(1024);
        let mut cache = TextureCache::new(&config(128), 1024);
        let a = alloc(&mut cache, &mut dev, 4, 4);
        let keep = alloc(&mut cache, &mut dev, 4, 4);
        assert!(cache.evict(&mut dev, a, &mut |_| {}));
        let (used, count, total) = (cache.budget.used_bytes, cache.budget.handle_count, cache.budget.total_bytes);
        assert!(!cache.evict(&mut dev, a, &mut |_| {}));
        assert_eq!((cache.budget.used_bytes, cache.budget.handle_count, cache.budget.total_bytes), (used, count, total));
        assert!(cache.is_valid(keep));
    }

    #[test]
    fn emptied_page_is_destroyed_without_reserve() {
        let mut dev = SoftwareDevice::new(1024);
        let mut cache = TextureCache::new(&config(128), 1024);
        let a = alloc(&mut cache, &mut dev, 4, 4);
        assert_eq!(dev.texture_count(), 1);
        cache.evict(&mut dev, a, &mut |_| {});
        assert_eq!(cache.page_count(), 0);
        assert_eq!(dev.texture_count(), 0);
        assert_eq!(cache.budget.total_bytes, 0);
    }

    #[test]
    fn emptied_page_is_reserved_then_reused() {
        let mut dev = SoftwareDevice::new(1024);
        let cfg = CanvasConfig { reserve_empty_bytes: 128 * 128, ..config(128) };
        let mut cache = TextureCache::new(&cfg, 1024);
        let a = alloc(&mut cache, &mut dev, 4, 4);
        cache.evict(&mut dev, a, &mut |_| {});
        assert_eq!(cache.page_count(), 1);
        assert_eq!(cache.budget.empty_bytes, 128 * 128);

        alloc(&mut cache, &mut dev, 4, 4);
        assert_eq!(cache.page_count(), 1);
        assert_eq!(cache.budget.empty_bytes, 0);
        assert_eq!(dev.texture_count(), 1);
    }

    #[test]
    fn standalone_eviction_deletes_texture() {
        let mut dev = SoftwareDevice::new(1024);
        let mut cache = TextureCache::new(&config(128), 1024);
        let a = alloc(&mut cache, &mut dev, 100, 100);
        assert_eq!(cache.budget.total_bytes, 10_000);
        cache.evict(&mut dev, a, &mut |_| {});
        assert_eq!(cache.standalone_count(), 0);
        assert_eq!(dev.texture_count(), 0);
        assert_eq!(cache.budget.total_bytes, 0);
        assert_eq!(cache.budget.used_bytes, 0);
    }
}
