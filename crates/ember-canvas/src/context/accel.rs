use crate::coords::{IntPoint, IntRect, Rect, Transform, Vec2};
use crate::device::{BlendMode, DrawCommand, Geometry, Shading, SurfaceFormat, TextureSampling};
use crate::paint::{Color, CompositeOp, DrawOptions, Pattern, SamplingFilter, SpreadMode, SurfacePattern};
use crate::profile::UsageProfile;
use crate::surface::SourceSurface;
use crate::texture::HandleId;

use super::{GpuContext, TargetView};

/// Device coordinates past ±2^20 lose precision in the GPU pipeline.
const PRECISION_LIMIT: f32 = (1 << 20) as f32;

pub(crate) fn rect_inside_precision_limits(r: Rect) -> bool {
    let (lo, hi) = (r.min(), r.max());
    r.is_finite()
        && lo.x >= -PRECISION_LIMIT
        && lo.y >= -PRECISION_LIMIT
        && hi.x <= PRECISION_LIMIT
        && hi.y <= PRECISION_LIMIT
}

/// Modulation color for a texture read of `format`: A8 texels tint black,
/// color texels pass through.
fn texture_tint(format: SurfaceFormat, alpha: f32) -> (Color, bool) {
    if format.is_alpha_only() {
        (Color::black().scale_alpha(alpha), true)
    } else {
        (Color::white().scale_alpha(alpha), false)
    }
}

impl GpuContext {
    /// Whether the op maps onto a GPU blend state.
    #[inline]
    pub(crate) fn supports_draw_options(&self, options: &DrawOptions) -> bool {
        options.op.is_gpu_blend()
    }

    /// Solid colors, and clamped surface patterns small enough to upload.
    pub(crate) fn supports_pattern(&self, pattern: &Pattern) -> bool {
        match pattern {
            Pattern::Color(_) => true,
            Pattern::Surface(p) => {
                let region = p.source_rect();
                p.extend == SpreadMode::Pad && !region.is_empty() && region.size().max_dim() <= self.max_surface_size
            }
            Pattern::LinearGradient(_) => false,
        }
    }

    pub(super) fn submit(&mut self, cmd: &DrawCommand) -> bool {
        match self.device.draw(cmd) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("ember-canvas: GPU draw failed, using the CPU path: {err}");
                false
            }
        }
    }

    /// Picks the blend state for `op`. SOURCE only replaces what it covers
    /// on the GPU, so when `covered` (the exact device shape, if it is a
    /// rect) does not contain the clip, the clip is cleared first and the
    /// draw adds onto it.
    pub(super) fn resolve_blend(&mut self, view: &TargetView, op: CompositeOp, covered: Option<Rect>) -> Option<BlendMode> {
        let blend = BlendMode::from_op(op)?;
        if blend != BlendMode::Source || covered.is_some_and(|r| r.contains_rect(Rect::from(view.clip))) {
            return Some(blend);
        }
        self.device.clear(view.framebuffer, view.clip, view.clear_color()).ok()?;
        Some(BlendMode::Add)
    }

    /// Device → texel sampling for `handle`. `to_surface` maps device pixels
    /// into the surface the handle was uploaded from; reads clamp to
    /// `region` of that surface.
    fn sampling(
        &self,
        handle: HandleId,
        to_surface: Transform,
        region: IntRect,
        color: Color,
        alpha_mask: bool,
        nearest: bool,
    ) -> Option<TextureSampling> {
        let backing = self.textures.backing(handle)?;
        let shift = backing.bounds.origin() - self.textures.get(handle)?.sampling_offset();
        Some(TextureSampling {
            texture: backing.texture,
            uv_transform: to_surface.post_translate(shift.x as f32, shift.y as f32),
            bounds: region.translate(shift),
            color,
            alpha_mask,
            nearest,
        })
    }

    fn pattern_shading(
        &mut self,
        pattern: &SurfacePattern,
        alpha: f32,
        transform: Transform,
        profile: &mut UsageProfile,
    ) -> Option<Shading> {
        let region = pattern.source_rect();
        let cached = pattern.surface.texture().is_some_and(|h| self.textures.is_valid(h));
        let handle = self.surface_handle(&pattern.surface, region)?;
        if cached {
            profile.on_cache_hit();
        } else {
            profile.on_cache_miss();
        }
        let to_surface = transform.pre_concat(pattern.matrix).invert()?;
        let (color, alpha_mask) = texture_tint(pattern.surface.format(), alpha);
        let nearest = pattern.filter == SamplingFilter::Point;
        let sampling = self.sampling(handle, to_surface, region, color, alpha_mask, nearest)?;
        Some(Shading::Texture(sampling))
    }

    /// Draws `handle` so its texels land 1:1 on `dest` (device pixels).
    /// `quad` is the area actually rasterized and may extend past `dest`.
    pub(super) fn blit_handle(
        &mut self,
        view: &TargetView,
        handle: HandleId,
        dest: IntRect,
        quad: IntRect,
        color: Color,
        alpha_mask: bool,
        blend: BlendMode,
    ) -> bool {
        let Some(backing) = self.textures.backing(handle) else { return false };
        self.textures.touch(handle);
        let shift = backing.bounds.origin() - dest.origin();
        let cmd = DrawCommand {
            target: view.framebuffer,
            scissor: Some(view.clip),
            blend,
            geometry: Geometry::Quad { rect: Rect::from(quad), transform: Transform::identity() },
            shading: Shading::Texture(TextureSampling {
                texture: backing.texture,
                uv_transform: Transform::translation(shift.x as f32, shift.y as f32),
                bounds: backing.bounds,
                color,
                alpha_mask,
                nearest: true,
            }),
            aa: false,
        };
        self.submit(&cmd)
    }

    /// Pixel-aligned opaque fills and SOURCE fills become scissored clears.
    fn try_clear(&mut self, view: &TargetView, device_rect: Rect, color: Color, options: &DrawOptions, transform: Transform) -> bool {
        let opaque_over = options.op == CompositeOp::Over && options.alpha >= 1.0 && color.is_opaque();
        if !(opaque_over || options.op == CompositeOp::Source)
            || !transform.has_only_integer_translation()
            || !device_rect.is_integer(1e-3)
        {
            return false;
        }
        let rect = device_rect.round().intersect(view.clip);
        if options.op == CompositeOp::Source
            && !device_rect.contains_rect(Rect::from(view.clip))
            && self.device.clear(view.framebuffer, view.clip, view.clear_color()).is_err()
        {
            return false;
        }
        rect.is_empty() || self.device.clear(view.framebuffer, rect, color).is_ok()
    }

    // ── rects ─────────────────────────────────────────────────────────────

    /// Fills `rect` with a solid color or a clamped surface pattern.
    /// Returns false when the caller must draw on the CPU instead.
    pub(crate) fn draw_rect_accel(
        &mut self,
        view: &TargetView,
        rect: Rect,
        pattern: &Pattern,
        options: &DrawOptions,
        transform: Transform,
        profile: &mut UsageProfile,
    ) -> bool {
        let device_rect = transform.map_rect_bounds(rect);
        if !rect_inside_precision_limits(device_rect)
            || !self.supports_draw_options(options)
            || !self.supports_pattern(pattern)
        {
            return false;
        }

        if let Pattern::Color(c) = pattern {
            if self.try_clear(view, device_rect, c.scale_alpha(options.alpha), options, transform) {
                profile.on_uncached_draw();
                return true;
            }
        }

        let exact = transform.preserves_axis_aligned_rects().then_some(device_rect);
        let Some(blend) = self.resolve_blend(view, options.op, exact) else { return false };
        let shading = match pattern {
            Pattern::Color(c) => {
                profile.on_uncached_draw();
                Shading::Solid(c.scale_alpha(options.alpha))
            }
            Pattern::Surface(p) => match self.pattern_shading(p, options.alpha, transform, profile) {
                Some(s) => s,
                None => return false,
            },
            Pattern::LinearGradient(_) => return false,
        };
        let pixel_aligned = exact.is_some_and(|r| r.is_integer(1e-3));
        let cmd = DrawCommand {
            target: view.framebuffer,
            scissor: Some(view.clip),
            blend,
            geometry: Geometry::Quad { rect, transform },
            shading,
            aa: options.aa.is_enabled() && !pixel_aligned,
        };
        self.submit(&cmd)
    }

    /// Resets `rect` to transparent (opaque black on opaque targets),
    /// touching nothing outside it.
    pub(crate) fn clear_rect_accel(&mut self, view: &TargetView, rect: Rect, transform: Transform) -> bool {
        let device_rect = transform.map_rect_bounds(rect);
        if !rect_inside_precision_limits(device_rect) {
            return false;
        }
        let color = view.clear_color();
        if transform.has_only_integer_translation() && device_rect.is_integer(1e-3) {
            let r = device_rect.round().intersect(view.clip);
            return r.is_empty() || self.device.clear(view.framebuffer, r, color).is_ok();
        }
        let cmd = DrawCommand {
            target: view.framebuffer,
            scissor: Some(view.clip),
            blend: BlendMode::Source,
            geometry: Geometry::Quad { rect, transform },
            shading: Shading::Solid(color),
            aa: true,
        };
        self.submit(&cmd)
    }

    // ── surfaces ──────────────────────────────────────────────────────────

    /// Copies `src` of `surface` to `dest` verbatim, ignoring clip and
    /// blending.
    pub(crate) fn copy_surface_accel(
        &mut self,
        view: &TargetView,
        surface: &SourceSurface,
        src: IntRect,
        dest: IntPoint,
        profile: &mut UsageProfile,
    ) -> bool {
        let src = src.intersect(IntRect::from_size(surface.size()));
        let dest_rect = IntRect::from_origin_size(dest, src.size()).intersect(view.bounds());
        if dest_rect.is_empty() {
            return true;
        }
        if src.size().max_dim() > self.max_surface_size {
            return false;
        }
        let cached = surface.texture().is_some_and(|h| self.textures.is_valid(h));
        let Some(handle) = self.surface_handle(surface, src) else { return false };
        if cached {
            profile.on_cache_hit();
        } else {
            profile.on_cache_miss();
        }
        let to_surface = Transform::translation((src.x - dest.x) as f32, (src.y - dest.y) as f32);
        let (color, alpha_mask) = texture_tint(surface.format(), 1.0);
        let Some(sampling) = self.sampling(handle, to_surface, src, color, alpha_mask, true) else { return false };
        let cmd = DrawCommand {
            target: view.framebuffer,
            scissor: None,
            blend: BlendMode::Source,
            geometry: Geometry::Quad { rect: Rect::from(dest_rect), transform: Transform::identity() },
            shading: Shading::Texture(sampling),
            aa: false,
        };
        self.submit(&cmd)
    }

    /// Paints `color` through the alpha of `surface` placed at `offset`.
    pub(crate) fn mask_surface_accel(
        &mut self,
        view: &TargetView,
        color: Color,
        surface: &SourceSurface,
        offset: Vec2,
        options: &DrawOptions,
        transform: Transform,
        profile: &mut UsageProfile,
    ) -> bool {
        let full = IntRect::from_size(surface.size());
        let rect = Rect::from(full).translate(offset);
        let device_rect = transform.map_rect_bounds(rect);
        if !rect_inside_precision_limits(device_rect)
            || !self.supports_draw_options(options)
            || full.size().max_dim() > self.max_surface_size
        {
            return false;
        }
        let exact = transform.preserves_axis_aligned_rects().then_some(device_rect);
        let Some(blend) = self.resolve_blend(view, options.op, exact) else { return false };

        let cached = surface.texture().is_some_and(|h| self.textures.is_valid(h));
        let Some(handle) = self.surface_handle(surface, full) else { return false };
        if cached {
            profile.on_cache_hit();
        } else {
            profile.on_cache_miss();
        }
        let placed = transform.pre_translate(offset.x, offset.y);
        let Some(to_surface) = placed.invert() else { return false };
        let nearest = placed.has_only_integer_translation();
        let tint = color.scale_alpha(options.alpha);
        let Some(sampling) = self.sampling(handle, to_surface, full, tint, true, nearest) else { return false };
        let cmd = DrawCommand {
            target: view.framebuffer,
            scissor: Some(view.clip),
            blend,
            geometry: Geometry::Quad { rect, transform },
            shading: Shading::Texture(sampling),
            aa: options.aa.is_enabled() && !nearest,
        };
        self.submit(&cmd)
    }

    /// Uploads a full-target RGBA image and composites it over (or in place
    /// of) the framebuffer. `previous` is reused when still valid.
    pub(crate) fn composite_full(
        &mut self,
        view: &TargetView,
        previous: Option<HandleId>,
        pixels: &[u8],
        over: bool,
    ) -> Option<HandleId> {
        let stride = view.size.width as usize * 4;
        let reusable = previous.filter(|h| self.textures.get(*h).is_some_and(|t| t.is_valid() && t.size() == view.size));
        let handle = match reusable {
            Some(h) => {
                if let Err(err) = self.upload_handle(h, pixels, stride) {
                    log::warn!("ember-canvas: overlay upload failed: {err}");
                    self.evict(h);
                    return None;
                }
                h
            }
            None => {
                if let Some(stale) = previous {
                    self.evict(stale);
                }
                self.upload_new(view.size, SurfaceFormat::Rgba8, true, pixels, stride)?
            }
        };
        let full = TargetView { clip: view.bounds(), ..*view };
        let blend = if over { BlendMode::Over } else { BlendMode::Source };
        let bounds = view.bounds();
        self.blit_handle(&full, handle, bounds, bounds, Color::white(), false, blend)
            .then_some(handle)
    }
}
