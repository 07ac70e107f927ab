//! Glyph run rasterization into premultiplied white coverage pixmaps.
//!
//! Bitmaps come from the font at `size * scale`, where `scale` is the
//! larger axis scale of the device transform; the rest of the transform is
//! applied when the bitmaps are composited.

use crate::coords::{IntRect, Rect, Transform, Vec2};
use crate::paint::StrokeOptions;

use super::{GlyphRun, ScaledFont};

/// A glyph at a device-space pen position.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PlacedGlyph {
    pub index: u16,
    pub pos: Vec2,
}

/// Maps every pen position of `run` through `transform`.
pub fn place(run: &GlyphRun, transform: Transform) -> Vec<PlacedGlyph> {
    run.glyphs
        .iter()
        .map(|g| PlacedGlyph { index: g.index, pos: transform.map_point(g.pos) })
        .collect()
}

fn linear_part(t: Transform) -> Transform {
    Transform { tx: 0.0, ty: 0.0, ..t }
}

fn raster_scale(font: &ScaledFont, transform: Transform) -> (f32, f32) {
    let f = transform.scale_factors();
    let s = f.x.max(f.y).max(1e-3);
    (font.size() * s, s)
}

/// Bitmap space → device space for a glyph at `pos`.
fn glyph_transform(pos: Vec2, linear: Transform, scale: f32) -> Transform {
    Transform::translation(pos.x, pos.y)
        .pre_concat(linear)
        .pre_concat(Transform::scale(1.0 / scale, 1.0 / scale))
}

/// Half the stroke width in device pixels.
pub fn stroke_radius(stroke: &StrokeOptions, transform: Transform) -> f32 {
    let f = transform.scale_factors();
    stroke.width.max(0.0) * 0.5 * f.x.max(f.y)
}

/// Device bounds of the inked pixels, padded for filtering and stroking.
/// `None` when no glyph has ink.
pub fn glyph_bounds(
    font: &ScaledFont,
    glyphs: &[PlacedGlyph],
    transform: Transform,
    stroke: Option<&StrokeOptions>,
) -> Option<Rect> {
    let (px, scale) = raster_scale(font, transform);
    let linear = linear_part(transform);
    let mut bounds: Option<Rect> = None;
    for g in glyphs {
        let m = font.source().metrics(g.index, px);
        if m.width == 0 || m.height == 0 {
            continue;
        }
        let local = Rect::new(
            m.xmin as f32,
            -(m.ymin + m.height as i32) as f32,
            m.width as f32,
            m.height as f32,
        );
        let r = glyph_transform(g.pos, linear, scale).map_rect_bounds(local);
        bounds = Some(bounds.map_or(r, |b| b.union(r)));
    }
    let pad = 1.0 + stroke.map_or(0.0, |s| stroke_radius(s, transform).ceil());
    bounds.map(|b| b.inflate(pad))
}

/// Rasterizes `glyphs` into a pixmap covering `bounds`.
///
/// With `stroke`, the coverage is replaced by its outline: the dilation by
/// the stroke radius minus the erosion by it.
pub fn rasterize(
    font: &ScaledFont,
    glyphs: &[PlacedGlyph],
    transform: Transform,
    bounds: IntRect,
    stroke: Option<&StrokeOptions>,
) -> Option<tiny_skia::Pixmap> {
    let mut out = tiny_skia::Pixmap::new(bounds.width as u32, bounds.height as u32)?;
    let (px, scale) = raster_scale(font, transform);
    let linear = linear_part(transform);

    for g in glyphs {
        let (m, coverage) = font.source().rasterize(g.index, px);
        let Some(size) = tiny_skia::IntSize::from_wh(m.width as u32, m.height as u32) else { continue };
        let data = coverage.iter().flat_map(|&a| [a, a, a, a]).collect();
        let Some(bitmap) = tiny_skia::Pixmap::from_vec(data, size) else { continue };

        let t = glyph_transform(g.pos, linear, scale)
            .post_translate(-bounds.x as f32, -bounds.y as f32)
            .pre_translate(m.xmin as f32, -(m.ymin + m.height as i32) as f32);
        let quality = if t.has_only_integer_translation() {
            tiny_skia::FilterQuality::Nearest
        } else {
            tiny_skia::FilterQuality::Bilinear
        };
        let paint = tiny_skia::PixmapPaint { quality, ..tiny_skia::PixmapPaint::default() };
        out.draw_pixmap(0, 0, bitmap.as_ref(), &paint, t.to_skia(), None);
    }

    if let Some(stroke) = stroke {
        outline(&mut out, stroke_radius(stroke, transform));
    }
    Some(out)
}

fn outline(pixmap: &mut tiny_skia::Pixmap, radius: f32) {
    let (w, h) = (pixmap.width() as i32, pixmap.height() as i32);
    let alpha: Vec<u8> = pixmap.data().chunks_exact(4).map(|p| p[3]).collect();
    let r = radius.max(0.5);
    let reach = r.ceil() as i32;
    let disc: Vec<(i32, i32)> = (-reach..=reach)
        .flat_map(|dy| (-reach..=reach).map(move |dx| (dx, dy)))
        .filter(|&(dx, dy)| ((dx * dx + dy * dy) as f32) <= r * r)
        .collect();
    let at = |x: i32, y: i32| {
        if x < 0 || y < 0 || x >= w || y >= h { 0 } else { alpha[(y * w + x) as usize] }
    };

    for (i, px) in pixmap.data_mut().chunks_exact_mut(4).enumerate() {
        let (x, y) = (i as i32 % w, i as i32 / w);
        let mut grown = 0u8;
        let mut shrunk = 255u8;
        for &(dx, dy) in &disc {
            let a = at(x + dx, y + dy);
            grown = grown.max(a);
            shrunk = shrunk.min(a);
        }
        px.fill(grown.saturating_sub(shrunk));
    }
}

/// True when every pixel is a shade of white, i.e. pure coverage.
pub fn is_coverage_only(pixmap: &tiny_skia::Pixmap) -> bool {
    pixmap.data().chunks_exact(4).all(|p| p[0] == p[3] && p[1] == p[3] && p[2] == p[3])
}

/// The alpha channel as a tightly packed A8 image.
pub fn extract_alpha(pixmap: &tiny_skia::Pixmap) -> Vec<u8> {
    pixmap.data().chunks_exact(4).map(|p| p[3]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::font::testing::box_font;
    use crate::text::Glyph;

    fn alpha_at(p: &tiny_skia::Pixmap, x: u32, y: u32) -> u8 {
        p.pixel(x, y).map_or(0, |c| c.alpha())
    }

    #[test]
    fn bounds_cover_ink_with_padding() {
        let font = box_font(10.0);
        let run = GlyphRun::new(vec![Glyph { index: 2, pos: Vec2::new(5.0, 20.0) }]);
        let b = glyph_bounds(&font, &place(&run, Transform::identity()), Transform::identity(), None).unwrap();
        assert_eq!(b.round_out(), IntRect::new(4, 9, 4, 12));
    }

    #[test]
    fn blank_run_has_no_bounds() {
        let font = box_font(10.0);
        let run = GlyphRun::new(vec![Glyph { index: 0, pos: Vec2::zero() }]);
        assert!(glyph_bounds(&font, &place(&run, Transform::identity()), Transform::identity(), None).is_none());
    }

    #[test]
    fn scaled_transform_scales_bounds() {
        let font = box_font(10.0);
        let t = Transform::scale(2.0, 2.0);
        let run = GlyphRun::new(vec![Glyph { index: 3, pos: Vec2::new(0.0, 10.0) }]);
        let b = glyph_bounds(&font, &place(&run, t), t, None).unwrap();
        assert_eq!(b.round_out(), IntRect::new(-1, -1, 5, 22));
    }

    #[test]
    fn fill_rasterizes_exact_box() {
        let font = box_font(10.0);
        let run = GlyphRun::new(vec![Glyph { index: 2, pos: Vec2::new(5.0, 20.0) }]);
        let bounds = IntRect::new(4, 9, 4, 12);
        let p = rasterize(&font, &place(&run, Transform::identity()), Transform::identity(), bounds, None).unwrap();
        assert_eq!(alpha_at(&p, 1, 1), 255);
        assert_eq!(alpha_at(&p, 2, 10), 255);
        assert_eq!(alpha_at(&p, 0, 5), 0);
        assert_eq!(alpha_at(&p, 3, 5), 0);
        assert_eq!(alpha_at(&p, 1, 11), 0);
        assert!(is_coverage_only(&p));
        assert_eq!(extract_alpha(&p).iter().filter(|&&a| a == 255).count(), 20);
    }

    #[test]
    fn stroke_keeps_only_the_outline() {
        let font = box_font(8.0);
        let run = GlyphRun::new(vec![Glyph { index: 4, pos: Vec2::new(2.0, 10.0) }]);
        let stroke = StrokeOptions::with_width(2.0);
        let placed = place(&run, Transform::identity());
        let bounds = glyph_bounds(&font, &placed, Transform::identity(), Some(&stroke)).unwrap().round_out();
        let p = rasterize(&font, &placed, Transform::identity(), bounds, Some(&stroke)).unwrap();
        let at = |x: i32, y: i32| alpha_at(&p, (x - bounds.x) as u32, (y - bounds.y) as u32);
        // Box spans x 2..6, y 2..10.
        assert_eq!(at(4, 6), 0, "interior is hollow");
        assert_eq!(at(2, 6), 255, "edge is inked");
        assert_eq!(at(1, 6), 255, "outline grows outward");
        assert_eq!(at(0, 6), 0);
    }
}
