//! Per-worker GPU state shared by draw targets.
//!
//! This module is responsible for:
//! - owning the device, the texture cache and both content caches
//! - the path vertex buffer and its orphaning
//! - memory-pressure handling at frame boundaries
//! - the accelerated draw paths the dispatcher tries before the CPU

mod accel;
mod glyph;
mod path;
mod slot;

pub use slot::ContextSlot;

use std::cell::RefCell;
use std::rc::Rc;

use crate::cache::{GlyphCache, PathCache};
use crate::config::CanvasConfig;
use crate::coords::{IntPoint, IntRect, IntSize};
use crate::device::{DeviceError, GpuDevice, SurfaceFormat, TextureId, VertexRange};
use crate::geom::PathVertex;
use crate::paint::Color;
use crate::surface::SourceSurface;
use crate::texture::{CacheOwner, HandleId, TextureCache};

/// Context handle held by every draw target of one worker.
pub type SharedContext = Rc<RefCell<GpuContext>>;

/// Where an accelerated draw lands.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct TargetView {
    pub framebuffer: TextureId,
    pub size: IntSize,
    /// Device clip, already intersected with the target bounds.
    pub clip: IntRect,
    /// Opaque targets clear to black instead of transparent.
    pub opaque: bool,
}

impl TargetView {
    #[inline]
    pub fn bounds(&self) -> IntRect {
        IntRect::from_size(self.size)
    }

    #[inline]
    pub fn clear_color(&self) -> Color {
        if self.opaque { Color::black() } else { Color::transparent() }
    }
}

/// Everything on the GPU side of the canvas that outlives a single target.
pub struct GpuContext {
    device: Box<dyn GpuDevice>,
    config: CanvasConfig,
    max_surface_size: i32,

    textures: TextureCache,
    paths: PathCache,
    glyphs: GlyphCache,

    vertex_capacity: usize,
    vertex_offset: usize,

    memory_pressure: bool,
}

/// Evicted handles detach from whichever cache entry owned them.
fn unlinker<'a>(paths: &'a mut PathCache, glyphs: &'a mut GlyphCache) -> impl FnMut(CacheOwner) + 'a {
    move |owner| match owner {
        CacheOwner::Path(id) => {
            paths.unlink(id);
        }
        CacheOwner::Glyph(id) => {
            glyphs.unlink(id);
        }
    }
}

impl GpuContext {
    pub fn new(mut device: Box<dyn GpuDevice>, config: CanvasConfig) -> Result<Self, DeviceError> {
        if device.is_lost() {
            return Err(DeviceError::Lost);
        }
        let caps = device.caps().clone();
        let vertex_capacity = config.path_vertex_capacity;
        if vertex_capacity > 0 {
            device.reset_vertex_buffer(vertex_capacity)?;
        }
        log::info!(
            "ember-canvas: context on {} ({}), max texture {}",
            caps.vendor,
            caps.backend,
            caps.max_texture_size
        );
        Ok(Self {
            textures: TextureCache::new(&config, caps.max_texture_size),
            max_surface_size: config.max_surface_size.min(caps.max_texture_size),
            device,
            config,
            paths: PathCache::new(),
            glyphs: GlyphCache::new(),
            vertex_capacity,
            vertex_offset: 0,
            memory_pressure: false,
        })
    }

    #[inline]
    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    #[inline]
    pub fn device(&self) -> &dyn GpuDevice {
        self.device.as_ref()
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut dyn GpuDevice {
        self.device.as_mut()
    }

    #[inline]
    pub fn is_lost(&self) -> bool {
        self.device.is_lost()
    }

    #[inline]
    pub fn textures(&self) -> &TextureCache {
        &self.textures
    }

    #[inline]
    pub fn path_cache(&self) -> &PathCache {
        &self.paths
    }

    #[inline]
    pub fn glyph_cache(&self) -> &GlyphCache {
        &self.glyphs
    }

    /// Largest surface or pattern the GPU path will upload.
    #[inline]
    pub fn max_surface_size(&self) -> i32 {
        self.max_surface_size
    }

    // ── memory ────────────────────────────────────────────────────────────

    /// Requests a full cache flush at the next frame boundary.
    pub fn on_memory_pressure(&mut self) {
        self.memory_pressure = true;
    }

    #[inline]
    pub fn memory_pressure_pending(&self) -> bool {
        self.memory_pressure
    }

    /// Evicts every cached texture and drains the empty-page reserve if
    /// memory pressure was signalled since the last call.
    pub fn clear_caches_if_necessary(&mut self) {
        if !std::mem::take(&mut self.memory_pressure) {
            return;
        }
        self.clear_all_textures();
        log::debug!("ember-canvas: caches cleared after memory pressure");
    }

    fn clear_all_textures(&mut self) {
        let mut unlink = unlinker(&mut self.paths, &mut self.glyphs);
        self.textures.clear_all(self.device.as_mut(), &mut unlink);
        self.textures.clear_empty_pages(self.device.as_mut());
    }

    pub fn prune_texture_memory(&mut self, margin: usize, prune_unused_only: bool) -> bool {
        let mut unlink = unlinker(&mut self.paths, &mut self.glyphs);
        self.textures
            .prune_texture_memory(self.device.as_mut(), margin, prune_unused_only, &mut unlink)
    }

    /// Frame-end upkeep: trims unreferenced textures and drops cache entries
    /// that lost both their pixels and their vertices.
    pub fn end_frame(&mut self) {
        self.prune_texture_memory(0, true);
        let max = self.config.max_cache_entries;
        let purged = self.paths.purge_detached(max) + self.glyphs.purge_detached(max);
        if purged > 0 {
            log::debug!("ember-canvas: purged {purged} detached cache entries");
        }
    }

    /// Releases every cached resource.
    pub fn teardown(&mut self) {
        self.clear_all_textures();
        self.paths.clear();
        self.glyphs.clear();
    }

    pub fn evict(&mut self, handle: HandleId) -> bool {
        let mut unlink = unlinker(&mut self.paths, &mut self.glyphs);
        self.textures.evict(self.device.as_mut(), handle, &mut unlink)
    }

    /// Allocates a handle after making room for it under the byte budget.
    pub fn allocate(&mut self, size: IntSize, format: SurfaceFormat, standalone: bool) -> Option<HandleId> {
        let bytes = size.area() * format.storage().bytes_per_pixel();
        self.prune_texture_memory(bytes, false);
        let mut unlink = unlinker(&mut self.paths, &mut self.glyphs);
        match self.textures.allocate(self.device.as_mut(), size, format, standalone, &mut unlink) {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::warn!("ember-canvas: texture allocation of {size:?} failed: {err}");
                None
            }
        }
    }

    /// Writes `data` (rows `stride` bytes apart) over the whole handle.
    pub fn upload_handle(&mut self, handle: HandleId, data: &[u8], stride: usize) -> Result<(), DeviceError> {
        let backing = self.textures.backing(handle).ok_or(DeviceError::InvalidRegion)?;
        self.device
            .upload(backing.texture, backing.bounds.origin(), backing.bounds.size(), Some(data), stride)
    }

    /// Allocates and fills a handle in one step. The handle is evicted again
    /// if the upload fails.
    pub fn upload_new(&mut self, size: IntSize, format: SurfaceFormat, standalone: bool, data: &[u8], stride: usize) -> Option<HandleId> {
        let handle = self.allocate(size, format, standalone)?;
        if let Err(err) = self.upload_handle(handle, data, stride) {
            log::warn!("ember-canvas: upload failed, using the CPU path: {err}");
            self.evict(handle);
            return None;
        }
        Some(handle)
    }

    /// Returns a handle holding `region` of `surface`, uploading it on first
    /// use. The whole surface is cached when it fits; otherwise only
    /// `region` is uploaded and the handle's sampling offset records where it
    /// starts.
    pub fn surface_handle(&mut self, surface: &SourceSurface, region: IntRect) -> Option<HandleId> {
        if let Some(handle) = surface.texture() {
            if let Some(h) = self.textures.get(handle).filter(|h| h.is_valid()) {
                let held = IntRect::from_origin_size(h.sampling_offset(), h.size());
                if held.contains(region) {
                    self.textures.touch(handle);
                    return Some(handle);
                }
            }
        }

        let full = IntRect::from_size(surface.size());
        let upload = if full.size().max_dim() <= self.max_surface_size { full } else { region.intersect(full) };
        if upload.is_empty() || upload.size().max_dim() > self.max_surface_size {
            return None;
        }
        let bpp = surface.format().bytes_per_pixel();
        let start = upload.y as usize * surface.stride() + upload.x as usize * bpp;
        let handle = self.upload_new(upload.size(), surface.format(), false, &surface.data()[start..], surface.stride())?;

        if let Some(old) = surface.texture() {
            self.evict(old);
        }
        self.textures.set_sampling_offset(handle, upload.origin());
        self.textures.set_surface(handle, Some(surface.downgrade()));
        surface.set_texture(Some(handle));
        Some(handle)
    }

    // ── path vertex buffer ────────────────────────────────────────────────

    /// Appends `vertices` to the path vertex buffer, orphaning it (and
    /// forgetting every cached range) when full. `None` when the buffer is
    /// disabled or the vertices can never fit.
    pub fn write_path_vertices(&mut self, vertices: &[PathVertex]) -> Option<VertexRange> {
        if self.vertex_capacity == 0 || vertices.is_empty() || vertices.len() > self.vertex_capacity {
            return None;
        }
        if self.vertex_offset + vertices.len() > self.vertex_capacity {
            if let Err(err) = self.device.reset_vertex_buffer(self.vertex_capacity) {
                log::warn!("ember-canvas: vertex buffer reset failed: {err}");
                return None;
            }
            self.paths.clear_vertex_ranges();
            self.vertex_offset = 0;
            log::debug!("ember-canvas: orphaned path vertex buffer ({} vertices)", self.vertex_capacity);
        }
        if let Err(err) = self.device.write_vertices(self.vertex_offset, vertices) {
            log::warn!("ember-canvas: vertex upload failed: {err}");
            return None;
        }
        let range = VertexRange { offset: self.vertex_offset as u32, count: vertices.len() as u32 };
        self.vertex_offset += vertices.len();
        Some(range)
    }

    #[inline]
    pub(crate) fn vertex_buffer_enabled(&self) -> bool {
        self.vertex_capacity > 0
    }

    // ── target framebuffers ───────────────────────────────────────────────

    /// Creates a framebuffer texture outside the cache budget.
    pub(crate) fn create_framebuffer(&mut self, size: IntSize, format: SurfaceFormat) -> Result<TextureId, DeviceError> {
        let texture = self.device.create_texture(size, format)?;
        let clear = if format.is_opaque() { Color::black() } else { Color::transparent() };
        if let Err(err) = self.device.clear(texture, IntRect::from_size(size), clear) {
            self.device.delete_texture(texture);
            return Err(err);
        }
        Ok(texture)
    }

    pub(crate) fn read_framebuffer(&mut self, view: &TargetView, rect: IntRect, dst: &mut [u8], stride: usize) -> Result<(), DeviceError> {
        self.device.read_pixels(view.framebuffer, rect, dst, stride)
    }

    pub(crate) fn delete_framebuffer(&mut self, texture: TextureId) {
        self.device.delete_texture(texture);
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        if !self.device.is_lost() {
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;

    fn context(config: CanvasConfig) -> GpuContext {
        GpuContext::new(Box::new(SoftwareDevice::new(4096)), config).unwrap()
    }

    fn small_config() -> CanvasConfig {
        CanvasConfig { shared_page_size: 64, max_cache_bytes: 1 << 20, ..CanvasConfig::default() }
    }

    // ── creation ──────────────────────────────────────────────────────────

    #[test]
    fn lost_device_is_rejected() {
        let mut device = SoftwareDevice::new(1024);
        device.lose();
        assert!(matches!(GpuContext::new(Box::new(device), CanvasConfig::default()), Err(DeviceError::Lost)));
    }

    #[test]
    fn surface_size_is_capped_by_device() {
        let ctx = GpuContext::new(Box::new(SoftwareDevice::new(1024)), CanvasConfig::default()).unwrap();
        assert_eq!(ctx.max_surface_size(), 1024);
    }

    // ── surfaces ──────────────────────────────────────────────────────────

    #[test]
    fn surface_upload_is_reused() {
        let mut ctx = context(small_config());
        let s = SourceSurface::from_pixels(IntSize::new(4, 4), SurfaceFormat::Rgba8, vec![9; 64]).unwrap();
        let a = ctx.surface_handle(&s, IntRect::new(0, 0, 4, 4)).unwrap();
        let b = ctx.surface_handle(&s, IntRect::new(1, 1, 2, 2)).unwrap();
        assert_eq!(a, b);
        assert_eq!(s.texture(), Some(a));
        assert_eq!(ctx.textures().budget().handle_count(), 1);
    }

    #[test]
    fn oversized_surface_uploads_only_the_region() {
        let mut ctx = context(CanvasConfig { max_surface_size: 8, ..small_config() });
        let s = SourceSurface::from_pixels(IntSize::new(16, 4), SurfaceFormat::A8, vec![1; 64]).unwrap();
        let h = ctx.surface_handle(&s, IntRect::new(10, 0, 4, 4)).unwrap();
        let handle = ctx.textures().get(h).unwrap();
        assert_eq!(handle.sampling_offset(), IntPoint::new(10, 0));
        assert_eq!(handle.size(), IntSize::new(4, 4));

        // A different region needs a fresh upload.
        let h2 = ctx.surface_handle(&s, IntRect::new(0, 0, 4, 4)).unwrap();
        assert_ne!(h, h2);
        assert!(!ctx.textures().is_valid(h));
    }

    #[test]
    fn dropped_surface_handles_are_pruned_at_frame_end() {
        let mut ctx = context(small_config());
        let s = SourceSurface::from_pixels(IntSize::new(4, 4), SurfaceFormat::Rgba8, vec![9; 64]).unwrap();
        let h = ctx.surface_handle(&s, IntRect::new(0, 0, 4, 4)).unwrap();
        ctx.end_frame();
        assert!(ctx.textures().is_valid(h));
        drop(s);
        ctx.end_frame();
        assert!(!ctx.textures().is_valid(h));
    }

    // ── vertex buffer ─────────────────────────────────────────────────────

    #[test]
    fn full_vertex_buffer_is_orphaned() {
        let mut ctx = context(CanvasConfig { path_vertex_capacity: 12, ..small_config() });
        let six = [PathVertex::default(); 6];
        let a = ctx.write_path_vertices(&six).unwrap();
        let b = ctx.write_path_vertices(&six).unwrap();
        assert_eq!((a.offset, b.offset), (0, 6));
        let c = ctx.write_path_vertices(&six).unwrap();
        assert_eq!(c.offset, 0);
        assert!(ctx.write_path_vertices(&[PathVertex::default(); 13]).is_none());
    }

    #[test]
    fn disabled_vertex_buffer_refuses() {
        let mut ctx = context(CanvasConfig { path_vertex_capacity: 0, ..small_config() });
        assert!(!ctx.vertex_buffer_enabled());
        assert!(ctx.write_path_vertices(&[PathVertex::default(); 3]).is_none());
    }

    // ── memory pressure ───────────────────────────────────────────────────

    #[test]
    fn memory_pressure_clears_at_next_boundary() {
        let mut ctx = context(small_config());
        let h = ctx.allocate(IntSize::new(8, 8), SurfaceFormat::A8, false).unwrap();
        ctx.on_memory_pressure();
        assert!(ctx.textures().is_valid(h), "nothing happens until the boundary");
        ctx.clear_caches_if_necessary();
        assert!(!ctx.textures().is_valid(h));
        assert_eq!(ctx.textures().page_count(), 0);
        assert_eq!(ctx.textures().budget().empty_bytes(), 0);
        assert!(!ctx.memory_pressure_pending());
    }

    #[test]
    fn allocation_prunes_to_fit() {
        let mut ctx = context(CanvasConfig { max_cache_bytes: 1024, shared_page_size: 64, ..CanvasConfig::default() });
        let a = ctx.allocate(IntSize::new(40, 20), SurfaceFormat::A8, true).unwrap();
        let b = ctx.allocate(IntSize::new(40, 20), SurfaceFormat::A8, true).unwrap();
        assert!(!ctx.textures().is_valid(a));
        assert!(ctx.textures().is_valid(b));
        assert!(ctx.textures().budget().used_bytes() <= 1024);
    }
}
