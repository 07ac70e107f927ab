//! Draw targets.
//!
//! A [`DrawTarget`] keeps its pixels in two places: a framebuffer texture on
//! the shared GPU context and a [`CpuSurface`]. Three flags record which copy
//! is current:
//!
//! - `gpu_valid`: the framebuffer alone holds the image;
//! - `cpu_valid`: the CPU surface holds the image (or, in overlay mode, an
//!   unmerged layer above the framebuffer);
//! - `cpu_overlay`: the CPU surface is such a layer.
//!
//! GPU draws go through `mark_changed`, CPU draws through `mark_cpu_changed`;
//! both move content across as needed before the draw lands.

mod dispatch;

use std::rc::Rc;

use crate::context::{SharedContext, TargetView};
use crate::coords::{IntRect, IntSize, Transform};
use crate::device::{DeviceError, SurfaceFormat, TextureId};
use crate::error::{CanvasError, CanvasResult};
use crate::geom::Path;
use crate::paint::CompositeOp;
use crate::profile::UsageProfile;
use crate::surface::{CpuSurface, SourceSurface};
use crate::texture::HandleId;

pub struct DrawTarget {
    context: SharedContext,
    size: IntSize,
    format: SurfaceFormat,
    transform: Transform,

    cpu: CpuSurface,
    framebuffer: TextureId,

    gpu_valid: bool,
    cpu_valid: bool,
    cpu_overlay: bool,
    /// The device may still be reading CPU memory of the last flush.
    sync_pending: bool,
    needs_present: bool,

    snapshot: Option<SourceSurface>,
    /// Upload slot for CPU → GPU flushes, reused while it stays valid.
    overlay_handle: Option<HandleId>,
    profile: UsageProfile,
}

impl DrawTarget {
    /// Creates a target of `size` on `context`.
    ///
    /// Sizes outside the accelerated range are refused with
    /// [`CanvasError::UnsupportedSize`] so the embedder can pick a plain
    /// CPU canvas instead.
    pub fn new(context: &SharedContext, size: IntSize, format: SurfaceFormat) -> CanvasResult<Self> {
        if format.is_alpha_only() {
            return Err(CanvasError::UnsupportedFormat(format));
        }
        let mut ctx = context.borrow_mut();
        if ctx.is_lost() {
            return Err(CanvasError::Device(DeviceError::Lost));
        }
        let config = ctx.config();
        let max_texture = ctx.device().caps().max_texture_size;
        let too_big = (config.max_size > 0 && size.max_dim() > config.max_size) || size.max_dim() > max_texture;
        let too_small = size.width < config.min_size && size.height < config.min_size;
        if size.is_empty() || too_big || too_small {
            return Err(CanvasError::UnsupportedSize(size));
        }
        let profile = UsageProfile::new(config);

        let cpu = CpuSurface::new(size, format)?;
        let framebuffer = ctx.create_framebuffer(size, format)?;
        drop(ctx);
        log::debug!("ember-canvas: new {}x{} {format:?} target", size.width, size.height);

        Ok(Self {
            context: Rc::clone(context),
            size,
            format,
            transform: Transform::identity(),
            cpu,
            framebuffer,
            gpu_valid: true,
            cpu_valid: false,
            cpu_overlay: false,
            sync_pending: false,
            needs_present: true,
            snapshot: None,
            overlay_handle: None,
            profile,
        })
    }

    #[inline]
    pub fn size(&self) -> IntSize {
        self.size
    }

    #[inline]
    pub fn format(&self) -> SurfaceFormat {
        self.format
    }

    #[inline]
    pub fn bounds(&self) -> IntRect {
        IntRect::from_size(self.size)
    }

    #[inline]
    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    // ── state ─────────────────────────────────────────────────────────────

    #[inline]
    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    /// Intersects the clip with `rect` under the current transform.
    pub fn push_clip_rect(&mut self, rect: crate::coords::Rect) {
        self.cpu.push_clip_rect(rect, self.transform);
    }

    /// Intersects the clip with `path`. Until it is popped, draws route to
    /// the CPU surface unless the path turns out to be a pixel-aligned rect.
    pub fn push_clip(&mut self, path: &Path) {
        match path.as_rect() {
            Some(rect) => self.cpu.push_clip_rect(rect, self.transform),
            None => self.cpu.push_clip(path, self.transform, true),
        }
    }

    pub fn pop_clip(&mut self) {
        self.cpu.pop_clip();
    }

    /// False once the GPU device has been lost. Drawing keeps working on the
    /// CPU surface, but the embedder should recreate the target.
    pub fn is_valid(&self) -> bool {
        !self.context.borrow().is_lost()
    }

    /// True when recent frames fell back to the CPU often enough that a
    /// plain CPU canvas would serve better.
    pub fn requires_refresh(&self) -> bool {
        self.profile.requires_refresh()
    }

    #[inline]
    pub fn profile(&self) -> &UsageProfile {
        &self.profile
    }

    // ── frames ────────────────────────────────────────────────────────────

    /// Starts a frame. `persisted` is the part of the previous frame the
    /// embedder keeps; when it is empty the old content is never shown again,
    /// so pending CPU content need not reach the GPU.
    pub fn begin_frame(&mut self, persisted: IntRect) {
        if std::mem::take(&mut self.needs_present) && !self.gpu_valid {
            if persisted.is_empty() {
                self.gpu_valid = true;
                self.cpu_valid = false;
                self.cpu_overlay = false;
            } else {
                self.flush_from_cpu();
            }
        }
        self.context.borrow_mut().clear_caches_if_necessary();
        self.profile.begin_frame();
    }

    pub fn end_frame(&mut self) {
        self.profile.end_frame();
        {
            let mut ctx = self.context.borrow_mut();
            ctx.end_frame();
            ctx.clear_caches_if_necessary();
        }
        self.needs_present = true;
    }

    // ── consistency ───────────────────────────────────────────────────────

    /// The GPU clip, or `None` when some clip layer is not a scissor rect.
    fn view(&self) -> Option<TargetView> {
        let clip = self.cpu.device_clip_rect()?.intersect(self.bounds());
        Some(TargetView {
            framebuffer: self.framebuffer,
            size: self.size,
            clip,
            opaque: self.format.is_opaque(),
        })
    }

    fn full_view(&self) -> TargetView {
        TargetView {
            framebuffer: self.framebuffer,
            size: self.size,
            clip: self.bounds(),
            opaque: self.format.is_opaque(),
        }
    }

    /// True when a draw with `op` should try the GPU: the framebuffer holds
    /// the image, or a pending overlay can be merged into it without a
    /// readback. CPU-authoritative content stays on the CPU until
    /// `begin_frame` flushes it.
    fn prefers_gpu(&self, op: CompositeOp) -> bool {
        op.is_gpu_blend() && (self.gpu_valid || (self.cpu_overlay && !op.supports_layering()))
    }

    /// Opens the GPU path for one draw, returning where it lands.
    fn gpu_view(&mut self) -> Option<TargetView> {
        let view = self.view()?;
        if self.context.borrow().is_lost() {
            return None;
        }
        self.mark_changed().then_some(view)
    }

    /// Gate before any GPU draw.
    fn mark_changed(&mut self) -> bool {
        self.snapshot = None;
        if !self.gpu_valid && !self.flush_from_cpu() {
            return false;
        }
        self.cpu_valid = false;
        true
    }

    /// Brings the framebuffer up to date with the CPU surface.
    fn flush_from_cpu(&mut self) -> bool {
        let mut ctx = self.context.borrow_mut();
        if ctx.is_lost() {
            self.gpu_valid = false;
            return false;
        }
        if self.gpu_valid {
            return true;
        }
        self.gpu_valid = true;
        if self.cpu_valid {
            let over = self.cpu_overlay;
            let view = self.full_view();
            match ctx.composite_full(&view, self.overlay_handle, self.cpu.data(), over) {
                Some(handle) => {
                    self.overlay_handle = Some(handle);
                    self.sync_pending = true;
                    if over {
                        // The CPU surface only held the layer.
                        self.cpu_valid = false;
                    }
                }
                None => {
                    self.overlay_handle = None;
                    self.gpu_valid = false;
                    return false;
                }
            }
        }
        self.cpu_overlay = false;
        true
    }

    /// Gate before a CPU draw with `op`. OVER draws onto GPU content start an
    /// overlay instead of reading the framebuffer back.
    fn mark_cpu_changed(&mut self, op: CompositeOp) {
        if !op.supports_layering() {
            self.mark_cpu_changed_full();
            return;
        }
        self.snapshot = None;
        self.wait_for_sync();
        if !self.cpu_valid {
            self.cpu_valid = true;
            if self.gpu_valid && !self.context.borrow().is_lost() {
                self.profile.on_layer();
                self.cpu.clear_layer();
                self.cpu_overlay = true;
            }
        }
        self.gpu_valid = false;
    }

    /// Gate before a CPU draw that needs the complete image.
    fn mark_cpu_changed_full(&mut self) {
        self.snapshot = None;
        self.wait_for_sync();
        if !self.cpu_valid {
            self.read_into_cpu();
        } else if self.cpu_overlay {
            self.flatten_overlay();
        }
        self.gpu_valid = false;
    }

    fn read_framebuffer(&self, rect: IntRect, dst: &mut [u8], stride: usize) -> Result<(), DeviceError> {
        self.context.borrow_mut().read_framebuffer(&self.full_view(), rect, dst, stride)
    }

    fn read_into_cpu(&mut self) {
        if self.cpu_valid {
            return;
        }
        if self.gpu_valid {
            self.profile.on_fallback();
            let mut pixels = vec![0u8; self.cpu.data().len()];
            match self.read_framebuffer(self.bounds(), &mut pixels, self.cpu.stride()) {
                Ok(()) => {
                    if let Err(err) = self.cpu.replace_pixels(&pixels) {
                        log::warn!("ember-canvas: readback rejected: {err}");
                    }
                }
                Err(err) => log::warn!("ember-canvas: framebuffer readback failed, content lost: {err}"),
            }
        }
        self.cpu_valid = true;
        self.cpu_overlay = false;
    }

    /// Merges the framebuffer beneath the CPU layer.
    fn flatten_overlay(&mut self) {
        if !self.cpu_overlay {
            return;
        }
        self.profile.on_readback();
        let mut base = vec![0u8; self.cpu.data().len()];
        match self.read_framebuffer(self.bounds(), &mut base, self.cpu.stride()) {
            Ok(()) => {
                if let Err(err) = self.cpu.composite_pixels(base, CompositeOp::DestOver) {
                    log::warn!("ember-canvas: overlay merge failed: {err}");
                }
            }
            Err(err) => log::warn!("ember-canvas: framebuffer readback failed, content lost: {err}"),
        }
        self.cpu_overlay = false;
    }

    fn wait_for_sync(&mut self) {
        if std::mem::take(&mut self.sync_pending) {
            self.context.borrow_mut().device_mut().finish();
            self.profile.on_readback();
        }
    }

    // ── observation ───────────────────────────────────────────────────────

    /// Immutable copy of the current content. Repeated calls without an
    /// intervening change return the same surface.
    pub fn snapshot(&mut self) -> CanvasResult<SourceSurface> {
        if let Some(s) = &self.snapshot {
            return Ok(s.clone());
        }
        self.flatten_overlay();
        let surface = if self.cpu_valid {
            self.cpu.snapshot()
        } else {
            self.profile.on_readback();
            let mut pixels = vec![0u8; self.cpu.data().len()];
            self.read_framebuffer(self.bounds(), &mut pixels, self.cpu.stride())?;
            SourceSurface::from_pixels(self.size, self.format, pixels)?
        };
        self.snapshot = Some(surface.clone());
        Ok(surface)
    }

    /// Copies `rect` (clamped to the target) into `dst`, rows `stride` bytes
    /// apart, as premultiplied RGBA.
    pub fn read_pixels(&mut self, rect: IntRect, dst: &mut [u8], stride: usize) -> CanvasResult<()> {
        let rect = rect.intersect(self.bounds());
        if rect.is_empty() {
            return Ok(());
        }
        let row = rect.width as usize * 4;
        let needed = (rect.height as usize - 1) * stride.max(row) + row;
        if stride < row || dst.len() < needed {
            return Err(CanvasError::BufferTooSmall { needed, actual: dst.len() });
        }
        self.flatten_overlay();
        if self.cpu_valid {
            let src_stride = self.cpu.stride();
            let data = self.cpu.data();
            for r in 0..rect.height as usize {
                let s = (rect.y as usize + r) * src_stride + rect.x as usize * 4;
                dst[r * stride..r * stride + row].copy_from_slice(&data[s..s + row]);
            }
            return Ok(());
        }
        self.profile.on_readback();
        self.read_framebuffer(rect, dst, stride)?;
        Ok(())
    }

    /// Lends the CPU pixels (premultiplied RGBA, with their stride) to `f`.
    /// Whatever `f` writes becomes the target's content.
    pub fn with_locked_pixels<R>(&mut self, f: impl FnOnce(&mut [u8], usize) -> R) -> CanvasResult<R> {
        self.mark_cpu_changed_full();
        if !self.cpu_valid || self.cpu_overlay {
            return Err(CanvasError::PixelsUnavailable);
        }
        let stride = self.cpu.stride();
        Ok(f(self.cpu.data_mut(), stride))
    }
}

impl Drop for DrawTarget {
    fn drop(&mut self) {
        if let Ok(mut ctx) = self.context.try_borrow_mut() {
            if let Some(handle) = self.overlay_handle.take() {
                ctx.evict(handle);
            }
            ctx.delete_framebuffer(self.framebuffer);
        }
    }
}
