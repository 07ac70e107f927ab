use crate::cache::{PathCacheKey, PatternKey};
use crate::coords::{IntPoint, IntRect, Transform, Vec2};
use crate::device::{DrawCommand, Geometry, Shading, SurfaceFormat};
use crate::geom::{coverage_mask, tessellate_spans, Path, QuantizedPath};
use crate::paint::{Color, CompositeOp, DrawOptions, Pattern, StrokeOptions};
use crate::profile::UsageProfile;
use crate::surface::CpuSurface;
use crate::texture::{CacheOwner, HandleId};

use super::accel::rect_inside_precision_limits;
use super::{GpuContext, TargetView};

/// Cache placement of one path draw: whole-pixel origin plus the clipped
/// bounds relative to it.
struct Placement {
    origin: IntPoint,
    /// User → device, shifted so `origin` lands at (0, 0).
    local: Transform,
    key: PathCacheKey,
}

fn max_scale(transform: Transform) -> f32 {
    let f = transform.scale_factors();
    f.x.max(f.y).max(1e-3)
}

/// The outline a stroke covers, or the path itself for fills.
fn coverage_shape(path: &Path, stroke: Option<&StrokeOptions>, transform: Transform) -> Option<Path> {
    match stroke {
        Some(s) => path.stroke_outline(s, max_scale(transform)),
        None => Some(path.clone()),
    }
}

impl GpuContext {
    fn place_path(
        &self,
        view: &TargetView,
        path: &Path,
        pattern: &Pattern,
        options: &DrawOptions,
        stroke: Option<&StrokeOptions>,
        transform: Transform,
    ) -> Option<Placement> {
        let mut device = transform.map_rect_bounds(path.bounds());
        if let Some(s) = stroke {
            device = device.inflate(s.outset() * max_scale(transform));
        }
        if !rect_inside_precision_limits(device) {
            return None;
        }

        let int_origin = device.origin.floor();
        let snapped = (device.origin - int_origin).snap(4.0);
        let origin = IntPoint::new(int_origin.x as i32, int_origin.y as i32);
        let full = device.translate(Vec2::new(-int_origin.x, -int_origin.y)).round_out();
        let bounds = full.intersect(view.clip.translate(IntPoint::new(-origin.x, -origin.y)));
        let local = transform.post_translate(-int_origin.x, -int_origin.y);

        let key = PathCacheKey {
            path: QuantizedPath::new(path, transform, int_origin + snapped),
            transform,
            origin_offset: [(snapped.x * 16.0) as i32, (snapped.y * 16.0) as i32],
            full_size: full.size(),
            bounds,
            pattern: PatternKey::new(pattern, local, options.alpha),
            stroke: stroke.cloned(),
            sigma: -1.0,
            aa: options.aa.is_enabled(),
        };
        Some(Placement { origin, local, key })
    }

    /// Draws a filled or stroked path through the path cache: a cached
    /// texture if one is live, cached coverage spans for simple solid fills,
    /// or a fresh rasterization. Returns false when the caller must draw on
    /// the CPU instead.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn draw_path_accel(
        &mut self,
        view: &TargetView,
        path: &Path,
        pattern: &Pattern,
        options: &DrawOptions,
        stroke: Option<&StrokeOptions>,
        transform: Transform,
        profile: &mut UsageProfile,
    ) -> bool {
        if !self.supports_draw_options(options) {
            return false;
        }
        if let Pattern::Surface(_) = pattern {
            if !self.supports_pattern(pattern) {
                return false;
            }
        }
        let Some(placement) = self.place_path(view, path, pattern, options, stroke, transform) else { return false };
        if placement.key.bounds.is_empty() {
            return true;
        }
        if stroke.is_some() && placement.key.full_size.area() * 4 > view.size.area() {
            return false;
        }

        let Placement { origin, local, key } = placement;
        let (id, _) = self.paths.find_or_insert(key);
        let Some(entry) = self.paths.get(id) else { return false };
        let bounds = entry.key().bounds;
        let handle = entry.handle().filter(|h| self.textures.is_valid(*h));
        let range = entry.vertex_range();

        let Some(blend) = self.resolve_blend(view, options.op, None) else { return false };
        let dest = bounds.translate(origin);
        let color = pattern.as_color().map(|c| c.scale_alpha(options.alpha));

        if let Some(h) = handle {
            profile.on_cache_hit();
            return match color {
                Some(c) => self.blit_handle(view, h, dest, dest, c, true, blend),
                None => self.blit_handle(view, h, dest, dest, Color::white(), false, blend),
            };
        }

        let spans_allowed = self.vertex_buffer_enabled()
            && options.aa.is_enabled()
            && path.verb_count() <= self.config.path_max_complexity;
        let mut counted = false;
        if let (true, Some(c)) = (spans_allowed, color) {
            let range = match range {
                Some(r) => {
                    profile.on_cache_hit();
                    Some(r)
                }
                None => {
                    profile.on_cache_miss();
                    counted = true;
                    let Some(shape) = coverage_shape(path, stroke, transform) else { return true };
                    let Some(vertices) = tessellate_spans(&shape, local, bounds, true) else { return true };
                    let range = self.write_path_vertices(&vertices);
                    self.paths.set_vertex_range(id, range);
                    range
                }
            };
            if let Some(range) = range {
                let cmd = DrawCommand {
                    target: view.framebuffer,
                    scissor: Some(view.clip),
                    blend,
                    geometry: Geometry::Triangles { range, offset: origin },
                    shading: Shading::Solid(c),
                    aa: false,
                };
                return self.submit(&cmd);
            }
        }

        if !counted {
            profile.on_cache_miss();
        }
        let Some(h) = self.rasterize_path(path, pattern, options, stroke, local, bounds) else {
            self.paths.unlink(id);
            return false;
        };
        self.paths.link(id, h);
        self.textures.set_owner(h, Some(CacheOwner::Path(id)));
        match color {
            Some(c) => self.blit_handle(view, h, dest, dest, c, true, blend),
            None => self.blit_handle(view, h, dest, dest, Color::white(), false, blend),
        }
    }

    /// Solid fills become an A8 coverage mask; any other pattern is baked
    /// into RGBA along with the draw alpha.
    fn rasterize_path(
        &mut self,
        path: &Path,
        pattern: &Pattern,
        options: &DrawOptions,
        stroke: Option<&StrokeOptions>,
        local: Transform,
        bounds: IntRect,
    ) -> Option<HandleId> {
        if let Pattern::Color(_) = pattern {
            let shape = coverage_shape(path, stroke, local)?;
            let mask = coverage_mask(&shape, local, bounds, options.aa.is_enabled())?;
            return self.upload_new(bounds.size(), SurfaceFormat::A8, false, mask.data(), bounds.width as usize);
        }

        let mut surface = CpuSurface::new(bounds.size(), SurfaceFormat::Rgba8).ok()?;
        let baked = DrawOptions { op: CompositeOp::Over, ..*options };
        let t = local.post_translate(-bounds.x as f32, -bounds.y as f32);
        match stroke {
            Some(s) => surface.stroke_path(path, pattern, s, &baked, t),
            None => surface.fill_path(path, pattern, &baked, t),
        }
        self.upload_new(bounds.size(), SurfaceFormat::Rgba8, false, surface.data(), surface.stride())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CanvasConfig;
    use crate::coords::{IntSize, Rect};
    use crate::device::SoftwareDevice;
    use crate::geom::{FillRule, PathBuilder};
    use crate::paint::{AntialiasMode, ColorStop, LinearGradient, SpreadMode};

    fn setup(config: CanvasConfig) -> (GpuContext, TargetView) {
        let mut ctx = GpuContext::new(Box::new(SoftwareDevice::new(1024)), config).unwrap();
        let size = IntSize::new(64, 64);
        let fb = ctx.create_framebuffer(size, SurfaceFormat::Rgba8).unwrap();
        (ctx, TargetView { framebuffer: fb, size, clip: IntRect::from_size(size), opaque: false })
    }

    fn config() -> CanvasConfig {
        CanvasConfig { shared_page_size: 128, ..CanvasConfig::default() }
    }

    fn triangle() -> Path {
        let mut pb = PathBuilder::new();
        pb.move_to(Vec2::new(0.0, 0.0));
        pb.line_to(Vec2::new(10.0, 0.0));
        pb.line_to(Vec2::new(0.0, 10.0));
        pb.close();
        pb.finish(FillRule::NonZero).unwrap()
    }

    fn read(ctx: &mut GpuContext, view: &TargetView, x: i32, y: i32) -> [u8; 4] {
        let mut px = [0u8; 4];
        ctx.read_framebuffer(view, IntRect::new(x, y, 1, 1), &mut px, 4).unwrap();
        px
    }

    fn green() -> Pattern {
        Pattern::Color(Color::from_rgba8(0, 255, 0, 255))
    }

    // ── vertex spans ──────────────────────────────────────────────────────

    #[test]
    fn solid_path_uses_spans_then_hits() {
        let (mut ctx, view) = setup(config());
        let mut profile = UsageProfile::new(ctx.config());
        let t = Transform::translation(5.0, 5.0);
        assert!(ctx.draw_path_accel(&view, &triangle(), &green(), &DrawOptions::default(), None, t, &mut profile));
        assert_eq!(read(&mut ctx, &view, 6, 6), [0, 255, 0, 255]);
        assert_eq!(read(&mut ctx, &view, 14, 14), [0, 0, 0, 0]);
        assert_eq!(profile.current().cache_misses, 1);
        assert_eq!(ctx.textures().budget().handle_count(), 0);

        // Same shape at another whole-pixel offset reuses the spans.
        let moved = Transform::translation(30.0, 20.0);
        assert!(ctx.draw_path_accel(&view, &triangle(), &green(), &DrawOptions::default(), None, moved, &mut profile));
        assert_eq!(read(&mut ctx, &view, 31, 21), [0, 255, 0, 255]);
        assert_eq!(profile.current().cache_hits, 1);
        assert_eq!(ctx.path_cache().len(), 1);
    }

    // ── rasterized masks ──────────────────────────────────────────────────

    #[test]
    fn aliased_path_is_rasterized_to_a_mask() {
        let (mut ctx, view) = setup(config());
        let mut profile = UsageProfile::new(ctx.config());
        let options = DrawOptions { aa: AntialiasMode::None, ..DrawOptions::default() };
        let t = Transform::translation(2.0, 2.0);
        assert!(ctx.draw_path_accel(&view, &triangle(), &green(), &options, None, t, &mut profile));
        assert_eq!(read(&mut ctx, &view, 3, 3), [0, 255, 0, 255]);
        assert_eq!(ctx.textures().budget().handle_count(), 1);

        let key = ctx.place_path(&view, &triangle(), &green(), &options, None, t).unwrap().key;
        let id = ctx.path_cache().find(&key).unwrap();
        let handle = ctx.path_cache().get(id).unwrap().handle().unwrap();
        assert_eq!(ctx.textures().get(handle).unwrap().format(), SurfaceFormat::A8);
        assert_eq!(ctx.textures().get(handle).unwrap().owner(), Some(CacheOwner::Path(id)));

        assert!(ctx.draw_path_accel(&view, &triangle(), &green(), &options, None, t, &mut profile));
        assert_eq!(profile.current().cache_hits, 1);
    }

    #[test]
    fn evicted_mask_is_rebuilt() {
        let (mut ctx, view) = setup(CanvasConfig { path_vertex_capacity: 0, ..config() });
        let mut profile = UsageProfile::new(ctx.config());
        let t = Transform::translation(2.0, 2.0);
        assert!(ctx.draw_path_accel(&view, &triangle(), &green(), &DrawOptions::default(), None, t, &mut profile));
        let key = ctx.place_path(&view, &triangle(), &green(), &DrawOptions::default(), None, t).unwrap().key;
        let id = ctx.path_cache().find(&key).unwrap();
        let handle = ctx.path_cache().get(id).unwrap().handle().unwrap();
        assert!(ctx.evict(handle));
        assert!(ctx.path_cache().get(id).unwrap().is_detached());

        assert!(ctx.draw_path_accel(&view, &triangle(), &green(), &DrawOptions::default(), None, t, &mut profile));
        assert_eq!(profile.current().cache_misses, 2);
        assert_eq!(ctx.textures().budget().handle_count(), 1);
    }

    #[test]
    fn gradient_is_baked_into_rgba() {
        let (mut ctx, view) = setup(config());
        let mut profile = UsageProfile::new(ctx.config());
        let gradient = Pattern::LinearGradient(LinearGradient::new(
            Vec2::zero(),
            Vec2::new(10.0, 0.0),
            vec![ColorStop::new(0.0, Color::white()), ColorStop::new(1.0, Color::white())],
            SpreadMode::Pad,
        ));
        let rect = Path::rect(Rect::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        assert!(ctx.draw_path_accel(&view, &rect, &gradient, &DrawOptions::default(), None, Transform::identity(), &mut profile));
        assert_eq!(read(&mut ctx, &view, 5, 5), [255, 255, 255, 255]);
        let handle = ctx.textures().lru_order()[0];
        assert_eq!(ctx.textures().get(handle).unwrap().format(), SurfaceFormat::Rgba8);
    }

    // ── limits ────────────────────────────────────────────────────────────

    #[test]
    fn huge_strokes_and_unsupported_ops_go_to_cpu() {
        let (mut ctx, view) = setup(config());
        let mut profile = UsageProfile::new(ctx.config());
        let big = Path::rect(Rect::new(0.0, 0.0, 60.0, 60.0)).unwrap();
        let stroke = StrokeOptions::with_width(2.0);
        assert!(!ctx.draw_path_accel(&view, &big, &green(), &DrawOptions::default(), Some(&stroke), Transform::identity(), &mut profile));

        let xor = DrawOptions::with_op(CompositeOp::Xor);
        assert!(!ctx.draw_path_accel(&view, &triangle(), &green(), &xor, None, Transform::identity(), &mut profile));
    }

    #[test]
    fn fully_clipped_path_draws_nothing() {
        let (mut ctx, view) = setup(config());
        let mut profile = UsageProfile::new(ctx.config());
        let far = Transform::translation(200.0, 200.0);
        assert!(ctx.draw_path_accel(&view, &triangle(), &green(), &DrawOptions::default(), None, far, &mut profile));
        assert_eq!(ctx.path_cache().len(), 0);
    }
}
