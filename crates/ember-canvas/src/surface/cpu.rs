use tiny_skia::{BlendMode, FillRule as SkFillRule, Mask, MaskType, Paint, Pixmap, PixmapPaint, Shader};

use crate::coords::{IntPoint, IntRect, IntSize, Rect, Transform, Vec2};
use crate::device::SurfaceFormat;
use crate::error::{CanvasError, CanvasResult};
use crate::geom::Path;
use crate::paint::{CompositeOp, DrawOptions, Pattern, SamplingFilter, SpreadMode, StrokeOptions, SurfacePattern};
use crate::text::raster::{self, PlacedGlyph};
use crate::text::ScaledFont;

use super::SourceSurface;

/// One entry of the clip stack.
#[derive(Debug)]
enum ClipLayer {
    /// Pixel-aligned device rect.
    Rect(IntRect),
    /// Arbitrary coverage, with its device bounds.
    Mask { bounds: IntRect, mask: Mask },
}

impl ClipLayer {
    fn bounds(&self) -> IntRect {
        match self {
            ClipLayer::Rect(r) => *r,
            ClipLayer::Mask { bounds, .. } => *bounds,
        }
    }
}

/// CPU raster surface backed by a `tiny_skia::Pixmap`.
///
/// Every drawing call takes the user → device transform explicitly; the
/// clip stack lives here and applies to all of them.
pub struct CpuSurface {
    pixmap: Pixmap,
    format: SurfaceFormat,
    clips: Vec<ClipLayer>,
    /// Product of all clip layers; `None` without clips.
    clip_mask: Option<Mask>,
}

fn multiply_masks(dst: &mut Mask, src: &Mask) {
    for (d, s) in dst.data_mut().iter_mut().zip(src.data()) {
        *d = ((*d as u16 * *s as u16 + 127) / 255) as u8;
    }
}

fn paint(shader: Shader<'_>, blend_mode: BlendMode, anti_alias: bool) -> Paint<'_> {
    Paint { shader, blend_mode, anti_alias, ..Paint::default() }
}

impl CpuSurface {
    pub fn new(size: IntSize, format: SurfaceFormat) -> CanvasResult<Self> {
        if format.is_alpha_only() {
            return Err(CanvasError::UnsupportedFormat(format));
        }
        let pixmap = Pixmap::new(size.width.max(0) as u32, size.height.max(0) as u32)
            .ok_or(CanvasError::EmptySurface)?;
        let mut surface = Self { pixmap, format, clips: Vec::new(), clip_mask: None };
        surface.clear_all();
        Ok(surface)
    }

    #[inline]
    pub fn size(&self) -> IntSize {
        IntSize::new(self.pixmap.width() as i32, self.pixmap.height() as i32)
    }

    #[inline]
    pub fn format(&self) -> SurfaceFormat {
        self.format
    }

    #[inline]
    pub fn bounds(&self) -> IntRect {
        IntRect::from_size(self.size())
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.pixmap.width() as usize * 4
    }

    /// Premultiplied RGBA rows.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.pixmap.data()
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.pixmap.data_mut()
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<[u8; 4]> {
        if x < 0 || y < 0 {
            return None;
        }
        let c = self.pixmap.pixel(x as u32, y as u32)?;
        Some([c.red(), c.green(), c.blue(), c.alpha()])
    }

    pub fn snapshot(&self) -> SourceSurface {
        SourceSurface::from_pixmap(self.pixmap.clone(), self.format)
    }

    // ── clipping ──────────────────────────────────────────────────────────

    /// Intersection of every clip layer with the surface.
    pub fn clip_bounds(&self) -> IntRect {
        self.clips.iter().fold(self.bounds(), |acc, c| acc.intersect(c.bounds()))
    }

    /// The clip as a scissor rect, or `None` when some layer is not a
    /// pixel-aligned rect.
    pub fn device_clip_rect(&self) -> Option<IntRect> {
        self.clips
            .iter()
            .all(|c| matches!(c, ClipLayer::Rect(_)))
            .then(|| self.clip_bounds())
    }

    pub fn push_clip_rect(&mut self, rect: Rect, transform: Transform) {
        if transform.preserves_axis_aligned_rects() {
            let device = transform.map_rect_bounds(rect);
            if device.is_integer(1e-3) {
                self.push_layer(ClipLayer::Rect(device.round()));
                return;
            }
        }
        match Path::rect(rect) {
            Some(path) => self.push_clip(&path, transform, true),
            None => self.push_layer(ClipLayer::Rect(IntRect::default())),
        }
    }

    pub fn push_clip(&mut self, path: &Path, transform: Transform, aa: bool) {
        let bounds = transform.map_rect_bounds(path.bounds()).round_out().intersect(self.bounds());
        let layer = match Mask::new(self.pixmap.width(), self.pixmap.height()) {
            Some(mut mask) => {
                mask.fill_path(path.skia(), path.fill_rule().to_skia(), aa, transform.to_skia());
                ClipLayer::Mask { bounds, mask }
            }
            None => ClipLayer::Rect(IntRect::default()),
        };
        self.push_layer(layer);
    }

    pub fn pop_clip(&mut self) {
        if self.clips.pop().is_some() {
            self.rebuild_clip_mask();
        }
    }

    #[inline]
    pub fn clip_depth(&self) -> usize {
        self.clips.len()
    }

    fn push_layer(&mut self, layer: ClipLayer) {
        self.clips.push(layer);
        self.rebuild_clip_mask();
    }

    fn rebuild_clip_mask(&mut self) {
        if self.clips.is_empty() {
            self.clip_mask = None;
            return;
        }
        let Some(mut combined) = Mask::new(self.pixmap.width(), self.pixmap.height()) else {
            self.clip_mask = None;
            return;
        };
        combined.data_mut().fill(255);
        for layer in &self.clips {
            match layer {
                ClipLayer::Rect(r) => {
                    let keep = r.intersect(self.bounds());
                    let width = self.pixmap.width() as usize;
                    for (y, row) in combined.data_mut().chunks_exact_mut(width).enumerate() {
                        for (x, v) in row.iter_mut().enumerate() {
                            let inside = (x as i32) >= keep.x
                                && (x as i32) < keep.xmost()
                                && (y as i32) >= keep.y
                                && (y as i32) < keep.ymost();
                            if !inside {
                                *v = 0;
                            }
                        }
                    }
                }
                ClipLayer::Mask { mask, .. } => multiply_masks(&mut combined, mask),
            }
        }
        self.clip_mask = Some(combined);
    }

    // ── compositing core ──────────────────────────────────────────────────

    /// Runs `draw` with the right blend mode and clip. Ops that also affect
    /// pixels outside the drawn shape go through a transparent layer that is
    /// then composited over the whole clip.
    fn composite(&mut self, op: CompositeOp, draw: impl FnOnce(&mut Pixmap, BlendMode, Option<&Mask>)) {
        if !op.is_unbounded() {
            draw(&mut self.pixmap, op.to_skia(), self.clip_mask.as_ref());
            return;
        }
        let Some(mut layer) = Pixmap::new(self.pixmap.width(), self.pixmap.height()) else { return };
        draw(&mut layer, BlendMode::SourceOver, None);
        let paint = PixmapPaint {
            blend_mode: op.to_skia(),
            quality: tiny_skia::FilterQuality::Nearest,
            ..PixmapPaint::default()
        };
        self.pixmap.draw_pixmap(0, 0, layer.as_ref(), &paint, tiny_skia::Transform::identity(), self.clip_mask.as_ref());
    }

    /// Fills the whole device area through `coverage` (full-surface sized)
    /// with a user-space pattern.
    fn fill_through(&mut self, coverage: &Mask, pattern: &Pattern, options: &DrawOptions, transform: Transform) {
        let pixmap = pattern.surface_pixmap();
        let Some(mut shader) = pattern.to_shader(pixmap.as_ref(), options.alpha) else { return };
        shader.transform(transform.to_skia());
        let Some(area) = self.bounds().to_skia().map(|r| r.to_rect()) else { return };
        let mut coverage = coverage.clone();
        if let Some(clip) = &self.clip_mask {
            multiply_masks(&mut coverage, clip);
        }
        let op = options.op;
        if !op.is_unbounded() {
            let p = paint(shader, op.to_skia(), false);
            self.pixmap.fill_rect(area, &p, tiny_skia::Transform::identity(), Some(&coverage));
            return;
        }
        let Some(mut layer) = Pixmap::new(self.pixmap.width(), self.pixmap.height()) else { return };
        layer.fill_rect(area, &paint(shader, BlendMode::SourceOver, false), tiny_skia::Transform::identity(), Some(&coverage));
        let composite = PixmapPaint { blend_mode: op.to_skia(), ..PixmapPaint::default() };
        self.pixmap.draw_pixmap(0, 0, layer.as_ref(), &composite, tiny_skia::Transform::identity(), self.clip_mask.as_ref());
    }

    // ── drawing ───────────────────────────────────────────────────────────

    pub fn fill_path(&mut self, path: &Path, pattern: &Pattern, options: &DrawOptions, transform: Transform) {
        let pixmap = pattern.surface_pixmap();
        let Some(shader) = pattern.to_shader(pixmap.as_ref(), options.alpha) else { return };
        let aa = options.aa.is_enabled();
        let rule = path.fill_rule().to_skia();
        self.composite(options.op, |pm, blend, clip| {
            pm.fill_path(path.skia(), &paint(shader, blend, aa), rule, transform.to_skia(), clip);
        });
    }

    pub fn stroke_path(
        &mut self,
        path: &Path,
        pattern: &Pattern,
        stroke: &StrokeOptions,
        options: &DrawOptions,
        transform: Transform,
    ) {
        let pixmap = pattern.surface_pixmap();
        let Some(shader) = pattern.to_shader(pixmap.as_ref(), options.alpha) else { return };
        let aa = options.aa.is_enabled();
        let sk_stroke = stroke.to_skia();
        self.composite(options.op, |pm, blend, clip| {
            pm.stroke_path(path.skia(), &paint(shader, blend, aa), &sk_stroke, transform.to_skia(), clip);
        });
    }

    pub fn fill_rect(&mut self, rect: Rect, pattern: &Pattern, options: &DrawOptions, transform: Transform) {
        if let Some(path) = Path::rect(rect) {
            self.fill_path(&path, pattern, options, transform);
        }
    }

    pub fn stroke_rect(
        &mut self,
        rect: Rect,
        pattern: &Pattern,
        stroke: &StrokeOptions,
        options: &DrawOptions,
        transform: Transform,
    ) {
        if let Some(path) = Path::rect(rect) {
            self.stroke_path(&path, pattern, stroke, options, transform);
        }
    }

    /// Clears `rect` to transparent (opaque black on `Rgbx8`) inside the clip.
    pub fn clear_rect(&mut self, rect: Rect, transform: Transform) {
        let Some(path) = Path::rect(rect) else { return };
        let (shader, blend) = if self.format.is_opaque() {
            (Shader::SolidColor(tiny_skia::Color::BLACK), BlendMode::Source)
        } else {
            (Shader::SolidColor(tiny_skia::Color::TRANSPARENT), BlendMode::Clear)
        };
        let clip = self.clip_mask.as_ref();
        self.pixmap.fill_path(path.skia(), &paint(shader, blend, false), SkFillRule::Winding, transform.to_skia(), clip);
    }

    /// Resets every pixel, ignoring the clip.
    pub fn clear_all(&mut self) {
        let fill = if self.format.is_opaque() { [0, 0, 0, 255] } else { [0; 4] };
        for px in self.pixmap.data_mut().chunks_exact_mut(4) {
            px.copy_from_slice(&fill);
        }
    }

    /// Makes every pixel transparent, whatever the format. Used when the
    /// surface starts collecting an overlay above GPU content.
    pub fn clear_layer(&mut self) {
        self.pixmap.data_mut().fill(0);
    }

    pub fn fill_glyphs(&mut self, font: &ScaledFont, glyphs: &[PlacedGlyph], pattern: &Pattern, options: &DrawOptions, transform: Transform) {
        self.draw_glyphs(font, glyphs, pattern, None, options, transform);
    }

    pub fn stroke_glyphs(
        &mut self,
        font: &ScaledFont,
        glyphs: &[PlacedGlyph],
        pattern: &Pattern,
        stroke: &StrokeOptions,
        options: &DrawOptions,
        transform: Transform,
    ) {
        self.draw_glyphs(font, glyphs, pattern, Some(stroke), options, transform);
    }

    fn draw_glyphs(
        &mut self,
        font: &ScaledFont,
        glyphs: &[PlacedGlyph],
        pattern: &Pattern,
        stroke: Option<&StrokeOptions>,
        options: &DrawOptions,
        transform: Transform,
    ) {
        let Some(bounds) = raster::glyph_bounds(font, glyphs, transform, stroke) else { return };
        let bounds = bounds.round_out().intersect(self.clip_bounds());
        if bounds.is_empty() {
            return;
        }
        let Some(ink) = raster::rasterize(font, glyphs, transform, bounds, stroke) else { return };
        let Some(mut full) = Pixmap::new(self.pixmap.width(), self.pixmap.height()) else { return };
        full.draw_pixmap(bounds.x, bounds.y, ink.as_ref(), &PixmapPaint::default(), tiny_skia::Transform::identity(), None);
        let coverage = Mask::from_pixmap(full.as_ref(), MaskType::Alpha);
        self.fill_through(&coverage, pattern, options, transform);
    }

    /// Draws `src` of `surface` into `dest` (both in user space).
    pub fn draw_surface(
        &mut self,
        surface: &SourceSurface,
        dest: Rect,
        src: Rect,
        filter: SamplingFilter,
        options: &DrawOptions,
        transform: Transform,
    ) {
        let Some(matrix) = Transform::rect_to_rect(src, dest) else { return };
        let pattern = Pattern::Surface(SurfacePattern {
            surface: surface.clone(),
            extend: SpreadMode::Pad,
            matrix,
            filter,
            sampling_rect: Some(src.round_out()),
        });
        self.fill_rect(dest, &pattern, options, transform);
    }

    /// Paints `pattern` through the alpha of `mask` (both in user space).
    pub fn mask(&mut self, pattern: &Pattern, mask: &Pattern, options: &DrawOptions, transform: Transform) {
        let Some(mut layer) = Pixmap::new(self.pixmap.width(), self.pixmap.height()) else { return };
        let mask_pixmap = mask.surface_pixmap();
        let Some(mut shader) = mask.to_shader(mask_pixmap.as_ref(), 1.0) else { return };
        shader.transform(transform.to_skia());
        let Some(area) = self.bounds().to_skia().map(|r| r.to_rect()) else { return };
        layer.fill_rect(area, &paint(shader, BlendMode::SourceOver, false), tiny_skia::Transform::identity(), None);
        let coverage = Mask::from_pixmap(layer.as_ref(), MaskType::Alpha);
        self.fill_through(&coverage, pattern, options, transform);
    }

    /// Paints `pattern` through the alpha of `surface` placed at `offset`.
    pub fn mask_surface(
        &mut self,
        pattern: &Pattern,
        surface: &SourceSurface,
        offset: Vec2,
        options: &DrawOptions,
        transform: Transform,
    ) {
        let Some(source) = surface.to_pixmap() else { return };
        let Some(mut layer) = Pixmap::new(self.pixmap.width(), self.pixmap.height()) else { return };
        let placed = transform.pre_translate(offset.x, offset.y);
        let quality = if placed.has_only_integer_translation() {
            tiny_skia::FilterQuality::Nearest
        } else {
            tiny_skia::FilterQuality::Bilinear
        };
        let paint = PixmapPaint { quality, ..PixmapPaint::default() };
        layer.draw_pixmap(0, 0, source.as_ref(), &paint, placed.to_skia(), None);
        let coverage = Mask::from_pixmap(layer.as_ref(), MaskType::Alpha);
        self.fill_through(&coverage, pattern, options, transform);
    }

    /// Copies pixels verbatim, ignoring transform, clip and blending.
    pub fn copy_surface(&mut self, surface: &SourceSurface, src: IntRect, dest: IntPoint) {
        let src = src.intersect(IntRect::from_size(surface.size()));
        let target = IntRect::from_origin_size(dest, src.size()).intersect(self.bounds());
        if target.is_empty() {
            return;
        }
        let shift = IntPoint::new(src.x - dest.x, src.y - dest.y);
        let stride = self.stride();
        let data = self.pixmap.data_mut();
        for y in target.y..target.ymost() {
            for x in target.x..target.xmost() {
                let Some(px) = surface.pixel(x + shift.x, y + shift.y) else { continue };
                let o = y as usize * stride + x as usize * 4;
                data[o..o + 4].copy_from_slice(&px);
            }
        }
    }

    /// Composites a full-surface premultiplied RGBA image with `op`,
    /// ignoring the clip.
    pub fn composite_pixels(&mut self, pixels: Vec<u8>, op: CompositeOp) -> CanvasResult<()> {
        let needed = self.data().len();
        if pixels.len() != needed {
            return Err(CanvasError::BufferTooSmall { needed, actual: pixels.len() });
        }
        let Some(image) = tiny_skia::IntSize::from_wh(self.pixmap.width(), self.pixmap.height())
            .and_then(|size| Pixmap::from_vec(pixels, size))
        else {
            return Err(CanvasError::EmptySurface);
        };
        let paint = PixmapPaint {
            blend_mode: op.to_skia(),
            quality: tiny_skia::FilterQuality::Nearest,
            ..PixmapPaint::default()
        };
        self.pixmap.draw_pixmap(0, 0, image.as_ref(), &paint, tiny_skia::Transform::identity(), None);
        Ok(())
    }

    /// Replaces every pixel.
    pub fn replace_pixels(&mut self, pixels: &[u8]) -> CanvasResult<()> {
        let data = self.pixmap.data_mut();
        if pixels.len() != data.len() {
            return Err(CanvasError::BufferTooSmall { needed: data.len(), actual: pixels.len() });
        }
        data.copy_from_slice(pixels);
        Ok(())
    }
}
