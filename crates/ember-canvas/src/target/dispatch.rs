//! Per-call routing between the GPU context and the CPU surface.
//!
//! A draw tries the accelerated path while the framebuffer is current;
//! anything it refuses (unsupported op or pattern, non-rect clip, lost
//! device, failed upload) is drawn on the CPU surface instead. No draw is
//! dropped.

use crate::context::{GpuContext, TargetView};
use crate::coords::{IntPoint, IntRect, Rect, Transform, Vec2};
use crate::error::{CanvasError, CanvasResult};
use crate::geom::Path;
use crate::paint::{CompositeOp, DrawOptions, LineCap, Pattern, SamplingFilter, SpreadMode, StrokeOptions, SurfacePattern};
use crate::profile::UsageProfile;
use crate::surface::{CpuSurface, SourceSurface};
use crate::text::{raster, FontId, FontSystem, GlyphRun, ScaledFont};

use super::DrawTarget;

/// Device width under which a round cap is indistinguishable from a butt cap.
const THIN_ROUND_CAP: f32 = 1.0;

/// Line space → user space for a segment from `from` to `to`, with the
/// segment along +x. `None` for degenerate segments.
fn line_frame(from: Vec2, to: Vec2) -> Option<(Transform, f32)> {
    let d = to - from;
    let len = d.length();
    if !(len > 0.0) || !len.is_finite() {
        return None;
    }
    let (c, s) = (d.x / len, d.y / len);
    Some((Transform::from_row(c, s, -s, c, from.x, from.y), len))
}

impl DrawTarget {
    /// Tries `gpu` against the shared context and falls back to `cpu` on
    /// the CPU surface.
    fn dispatch<G, C>(&mut self, op: CompositeOp, gpu: G, cpu: C)
    where
        G: FnOnce(&mut GpuContext, &TargetView, &mut UsageProfile) -> bool,
        C: FnOnce(&mut CpuSurface),
    {
        if self.prefers_gpu(op) {
            if let Some(view) = self.gpu_view() {
                let mut ctx = self.context.borrow_mut();
                if gpu(&mut *ctx, &view, &mut self.profile) {
                    return;
                }
            }
        }
        self.mark_cpu_changed(op);
        cpu(&mut self.cpu);
    }

    // ── rects ─────────────────────────────────────────────────────────────

    pub fn fill_rect(&mut self, rect: Rect, pattern: &Pattern, options: &DrawOptions) {
        let t = self.transform;
        self.dispatch(
            options.op,
            |ctx, view, profile| {
                ctx.draw_rect_accel(view, rect, pattern, options, t, profile)
                    || Path::rect(rect).is_some_and(|p| ctx.draw_path_accel(view, &p, pattern, options, None, t, profile))
            },
            |cpu| cpu.fill_rect(rect, pattern, options, t),
        );
    }

    pub fn stroke_rect(&mut self, rect: Rect, pattern: &Pattern, stroke: &StrokeOptions, options: &DrawOptions) {
        let t = self.transform;
        self.dispatch(
            options.op,
            |ctx, view, profile| {
                Path::rect(rect).is_some_and(|p| ctx.draw_path_accel(view, &p, pattern, options, Some(stroke), t, profile))
            },
            |cpu| cpu.stroke_rect(rect, pattern, stroke, options, t),
        );
    }

    /// Resets `rect` to transparent, or to opaque black on `Rgbx8` targets.
    pub fn clear_rect(&mut self, rect: Rect) {
        let t = self.transform;
        self.dispatch(
            CompositeOp::Source,
            |ctx, view, _| ctx.clear_rect_accel(view, rect, t),
            |cpu| cpu.clear_rect(rect, t),
        );
    }

    // ── paths ─────────────────────────────────────────────────────────────

    pub fn fill(&mut self, path: &Path, pattern: &Pattern, options: &DrawOptions) {
        if let Some(rect) = path.as_rect() {
            self.fill_rect(rect, pattern, options);
            return;
        }
        let t = self.transform;
        self.dispatch(
            options.op,
            |ctx, view, profile| ctx.draw_path_accel(view, path, pattern, options, None, t, profile),
            |cpu| cpu.fill_path(path, pattern, options, t),
        );
    }

    pub fn stroke(&mut self, path: &Path, pattern: &Pattern, stroke: &StrokeOptions, options: &DrawOptions) {
        if let Some((from, to)) = path.as_line() {
            self.stroke_line(from, to, pattern, stroke, options);
            return;
        }
        let t = self.transform;
        self.dispatch(
            options.op,
            |ctx, view, profile| ctx.draw_path_accel(view, path, pattern, options, Some(stroke), t, profile),
            |cpu| cpu.stroke_path(path, pattern, stroke, options, t),
        );
    }

    /// Strokes one segment. Undashed solid lines whose caps do not round
    /// visibly are drawn as a single rotated rect.
    pub fn stroke_line(&mut self, from: Vec2, to: Vec2, pattern: &Pattern, stroke: &StrokeOptions, options: &DrawOptions) {
        let Some(path) = Path::line(from, to) else { return };
        let t = self.transform;
        let scale = t.scale_factors();
        let device_width = stroke.width * scale.x.max(scale.y);
        let rect_caps = match stroke.cap {
            LineCap::Butt | LineCap::Square => true,
            LineCap::Round => device_width <= THIN_ROUND_CAP,
        };
        let rect_form = (pattern.as_color().is_some() && !stroke.is_dashed() && rect_caps)
            .then(|| line_frame(from, to))
            .flatten()
            .map(|(frame, len)| {
                let half = stroke.width * 0.5;
                let ext = if stroke.cap == LineCap::Square { half } else { 0.0 };
                (Rect::new(-ext, -half, len + 2.0 * ext, stroke.width), t.pre_concat(frame))
            });

        self.dispatch(
            options.op,
            |ctx, view, profile| {
                rect_form.is_some_and(|(rect, frame)| ctx.draw_rect_accel(view, rect, pattern, options, frame, profile))
                    || ctx.draw_path_accel(view, &path, pattern, options, Some(stroke), t, profile)
            },
            |cpu| cpu.stroke_path(&path, pattern, stroke, options, t),
        );
    }

    // ── text ──────────────────────────────────────────────────────────────

    pub fn fill_glyphs(&mut self, font: &ScaledFont, run: &GlyphRun, pattern: &Pattern, options: &DrawOptions) {
        self.draw_glyphs(font, run, pattern, None, options);
    }

    pub fn stroke_glyphs(
        &mut self,
        font: &ScaledFont,
        run: &GlyphRun,
        pattern: &Pattern,
        stroke: &StrokeOptions,
        options: &DrawOptions,
    ) {
        self.draw_glyphs(font, run, pattern, Some(stroke), options);
    }

    fn draw_glyphs(
        &mut self,
        font: &ScaledFont,
        run: &GlyphRun,
        pattern: &Pattern,
        stroke: Option<&StrokeOptions>,
        options: &DrawOptions,
    ) {
        let t = self.transform;
        let color = pattern.as_color();
        self.dispatch(
            options.op,
            |ctx, view, profile| {
                color.is_some_and(|c| ctx.draw_glyphs_accel(view, font, run, c, options, stroke, t, profile))
            },
            |cpu| {
                let placed = raster::place(run, t);
                match stroke {
                    Some(s) => cpu.stroke_glyphs(font, &placed, pattern, s, options, t),
                    None => cpu.fill_glyphs(font, &placed, pattern, options, t),
                }
            },
        );
    }

    /// Shapes `text` with font `id` at `size` and fills it with its baseline
    /// starting at `origin`.
    #[allow(clippy::too_many_arguments)]
    pub fn fill_text(
        &mut self,
        fonts: &FontSystem,
        id: FontId,
        size: f32,
        text: &str,
        origin: Vec2,
        pattern: &Pattern,
        options: &DrawOptions,
    ) -> CanvasResult<()> {
        let font = fonts.scaled(id, size).ok_or(CanvasError::UnknownFont(id))?;
        let run = font.shape(text, origin);
        self.fill_glyphs(&font, &run, pattern, options);
        Ok(())
    }

    // ── surfaces ──────────────────────────────────────────────────────────

    /// Draws `src` of `surface` scaled into `dest` (both in user space).
    pub fn draw_surface(&mut self, surface: &SourceSurface, dest: Rect, src: Rect, filter: SamplingFilter, options: &DrawOptions) {
        let t = self.transform;
        let pattern = Transform::rect_to_rect(src, dest).map(|matrix| {
            Pattern::Surface(SurfacePattern {
                surface: surface.clone(),
                extend: SpreadMode::Pad,
                matrix,
                filter,
                sampling_rect: Some(src.round_out()),
            })
        });
        self.dispatch(
            options.op,
            |ctx, view, profile| {
                pattern.as_ref().is_some_and(|p| ctx.draw_rect_accel(view, dest, p, options, t, profile))
            },
            |cpu| cpu.draw_surface(surface, dest, src, filter, options, t),
        );
    }

    /// Paints `pattern` through the alpha of `mask`. Always drawn on the
    /// CPU surface.
    pub fn mask(&mut self, pattern: &Pattern, mask: &Pattern, options: &DrawOptions) {
        let t = self.transform;
        self.mark_cpu_changed(options.op);
        self.cpu.mask(pattern, mask, options, t);
    }

    /// Paints `pattern` through the alpha of `surface` placed at `offset`.
    pub fn mask_surface(&mut self, pattern: &Pattern, surface: &SourceSurface, offset: Vec2, options: &DrawOptions) {
        let t = self.transform;
        let color = pattern.as_color();
        self.dispatch(
            options.op,
            |ctx, view, profile| {
                color.is_some_and(|c| ctx.mask_surface_accel(view, c, surface, offset, options, t, profile))
            },
            |cpu| cpu.mask_surface(pattern, surface, offset, options, t),
        );
    }

    /// Copies `src` of `surface` to `dest` in device pixels, ignoring the
    /// transform, the clip and blending.
    pub fn copy_surface(&mut self, surface: &SourceSurface, src: IntRect, dest: IntPoint) {
        if let Some(view) = self.prefers_gpu(CompositeOp::Source).then(|| self.unclipped_gpu_view()).flatten() {
            let mut ctx = self.context.borrow_mut();
            if ctx.copy_surface_accel(&view, surface, src, dest, &mut self.profile) {
                return;
            }
        }
        self.mark_cpu_changed_full();
        self.cpu.copy_surface(surface, src, dest);
    }

    fn unclipped_gpu_view(&mut self) -> Option<TargetView> {
        if self.context.borrow().is_lost() {
            return None;
        }
        let view = self.full_view();
        self.mark_changed().then_some(view)
    }
}
