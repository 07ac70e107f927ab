use crate::cache::{placed_glyphs, quant_scale, quantize_run, GlyphCacheKey};
use crate::coords::{IntPoint, IntRect, Transform};
use crate::device::SurfaceFormat;
use crate::paint::{Color, DrawOptions, StrokeOptions};
use crate::profile::UsageProfile;
use crate::text::raster::{self, PlacedGlyph};
use crate::text::{GlyphRun, ScaledFont};
use crate::texture::{CacheOwner, HandleId};

use super::{GpuContext, TargetView};

impl GpuContext {
    /// Draws a solid-color glyph run through the glyph cache. Runs that
    /// differ only by a whole-pixel translation share one rasterization.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn draw_glyphs_accel(
        &mut self,
        view: &TargetView,
        font: &ScaledFont,
        run: &GlyphRun,
        color: Color,
        options: &DrawOptions,
        stroke: Option<&StrokeOptions>,
        transform: Transform,
        profile: &mut UsageProfile,
    ) -> bool {
        if !self.supports_draw_options(options) || !transform.is_finite() {
            return false;
        }
        if run.is_empty() {
            return true;
        }

        // Aliased text snaps pens to whole pixels.
        let subpixel = options.aa.is_enabled();
        let scale = quant_scale(transform, subpixel);
        let (glyphs, offset) = quantize_run(run, transform, scale);
        let placed = placed_glyphs(&glyphs, scale, IntPoint::default());
        let clip = view.clip.translate(IntPoint::new(-offset.x, -offset.y));
        let mut key = GlyphCacheKey {
            font: font.id(),
            size_bits: font.size().to_bits(),
            scale,
            linear: transform,
            glyphs,
            subpixel,
            stroke: stroke.cloned(),
            clip,
            bounds: IntRect::default(),
            full_bounds: IntRect::default(),
        };

        let id = match self.glyphs.find(&key) {
            Some(id) => id,
            None => {
                let Some(ink) = raster::glyph_bounds(font, &placed, transform, stroke) else { return true };
                key.full_bounds = ink.round_out();
                key.bounds = key.full_bounds.intersect(clip);
                if key.bounds.is_empty() {
                    return true;
                }
                self.glyphs.insert(key)
            }
        };
        let Some(entry) = self.glyphs.get(id) else { return false };
        let bounds = entry.key().bounds;
        let cached = entry.handle().filter(|h| self.textures.is_valid(*h));

        let Some(blend) = self.resolve_blend(view, options.op, None) else { return false };
        let handle = match cached {
            Some(h) => {
                profile.on_cache_hit();
                h
            }
            None => {
                profile.on_cache_miss();
                let Some(h) = self.rasterize_glyphs(font, &placed, transform, bounds, stroke) else {
                    self.glyphs.unlink(id);
                    return false;
                };
                self.glyphs.link(id, h);
                self.textures.set_owner(h, Some(CacheOwner::Glyph(id)));
                h
            }
        };

        let Some(format) = self.textures.get(handle).map(|h| h.format()) else { return false };
        let (tint, alpha_mask) = if format.is_alpha_only() {
            (color.scale_alpha(options.alpha), true)
        } else {
            (Color::white().scale_alpha(options.alpha), false)
        };
        let dest = bounds.translate(offset);
        self.blit_handle(view, handle, dest, dest.inflate(2), tint, alpha_mask, blend)
    }

    /// Grayscale coverage is stored as A8 and tinted at draw time; color
    /// glyphs keep their RGBA pixels.
    fn rasterize_glyphs(
        &mut self,
        font: &ScaledFont,
        placed: &[PlacedGlyph],
        transform: Transform,
        bounds: IntRect,
        stroke: Option<&StrokeOptions>,
    ) -> Option<HandleId> {
        let pixmap = raster::rasterize(font, placed, transform, bounds, stroke)?;
        if raster::is_coverage_only(&pixmap) {
            let alpha = raster::extract_alpha(&pixmap);
            self.upload_new(bounds.size(), SurfaceFormat::A8, false, &alpha, bounds.width as usize)
        } else {
            self.upload_new(bounds.size(), SurfaceFormat::Rgba8, false, pixmap.data(), bounds.width as usize * 4)
        }
    }
}
