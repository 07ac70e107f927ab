use crate::coords::{IntPoint, IntRect, Transform, Vec2};
use crate::paint::StrokeOptions;
use crate::text::raster::PlacedGlyph;
use crate::text::{FontId, GlyphRun};

use super::{hash_content, CacheKey};

const LINEAR_EPSILON: f32 = 1e-4;

/// Key of a rasterized glyph run.
///
/// Pen positions are quantized in device space: to whole pixels without
/// subpixel positioning, otherwise to quarter pixels along the text axis
/// (both axes under rotation). Positions are stored relative to the first
/// glyph's whole-pixel position, so the run hits again after a translation.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphCacheKey {
    pub font: FontId,
    pub size_bits: u32,
    /// Quantization steps per pixel on each axis.
    pub scale: IntPoint,
    /// Linear part of the user → device transform.
    pub linear: Transform,
    pub glyphs: Vec<(u16, IntPoint)>,
    /// Mask marker: coverage was rasterized with subpixel positions.
    pub subpixel: bool,
    pub stroke: Option<StrokeOptions>,
    /// Clip relative to the run offset, as seen by this draw.
    pub clip: IntRect,
    /// Cached (clipped) bounds relative to the run offset.
    pub bounds: IntRect,
    /// Unclipped bounds relative to the run offset.
    pub full_bounds: IntRect,
}

/// Quantization steps for `transform`: x only for upright text, y only for
/// text turned a quarter, both otherwise.
pub fn quant_scale(transform: Transform, subpixel: bool) -> IntPoint {
    if !subpixel {
        IntPoint::new(1, 1)
    } else if transform.ky == 0.0 {
        IntPoint::new(4, 1)
    } else if transform.sx == 0.0 {
        IntPoint::new(1, 4)
    } else {
        IntPoint::new(4, 4)
    }
}

/// Quantized glyph positions and the whole-pixel device offset they are
/// relative to.
pub fn quantize_run(run: &GlyphRun, transform: Transform, scale: IntPoint) -> (Vec<(u16, IntPoint)>, IntPoint) {
    let q = |p: Vec2| p.to_grid(scale);
    let first = run.glyphs.first().map_or(IntPoint::default(), |g| q(transform.map_point(g.pos)));
    let offset = IntPoint::new(first.x & !(scale.x - 1), first.y & !(scale.y - 1));
    let glyphs = run.glyphs.iter().map(|g| (g.index, q(transform.map_point(g.pos)) - offset)).collect();
    (glyphs, IntPoint::new(offset.x / scale.x, offset.y / scale.y))
}

/// Device pen positions the quantized glyphs stand for.
pub fn placed_glyphs(glyphs: &[(u16, IntPoint)], scale: IntPoint, offset: IntPoint) -> Vec<PlacedGlyph> {
    glyphs
        .iter()
        .map(|&(index, q)| PlacedGlyph {
            index,
            pos: Vec2::from(offset) + Vec2::from_grid(q, scale),
        })
        .collect()
}

impl CacheKey for GlyphCacheKey {
    fn content_hash(&self) -> u64 {
        hash_content(&self.glyphs)
    }

    fn matches(stored: &Self, query: &Self) -> bool {
        stored.font == query.font
            && stored.size_bits == query.size_bits
            && stored.scale == query.scale
            && stored.subpixel == query.subpixel
            && stored.linear.fuzzy_linear_eq(query.linear, LINEAR_EPSILON)
            && stored.glyphs == query.glyphs
            && stored.stroke == query.stroke
            && stored.full_bounds.intersect(query.clip) == stored.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ContentCache;
    use crate::text::Glyph;

    fn run(points: &[(u16, f32, f32)]) -> GlyphRun {
        GlyphRun::new(points.iter().map(|&(index, x, y)| Glyph { index, pos: Vec2::new(x, y) }).collect())
    }

    fn key(run: &GlyphRun, transform: Transform, clip: IntRect) -> (GlyphCacheKey, IntPoint) {
        let scale = quant_scale(transform, true);
        let (glyphs, offset) = quantize_run(run, transform, scale);
        let full_bounds = IntRect::new(-1, -12, 30, 16);
        let clip = clip.translate(IntPoint::new(-offset.x, -offset.y));
        let key = GlyphCacheKey {
            font: FontId(0),
            size_bits: 12f32.to_bits(),
            scale,
            linear: transform,
            glyphs,
            subpixel: true,
            stroke: None,
            clip,
            bounds: full_bounds.intersect(clip),
            full_bounds,
        };
        (key, offset)
    }

    fn wide() -> IntRect {
        IntRect::new(-500, -500, 2000, 2000)
    }

    // ── quantization ──────────────────────────────────────────────────────

    #[test]
    fn scale_follows_axis_alignment() {
        assert_eq!(quant_scale(Transform::identity(), false), IntPoint::new(1, 1));
        assert_eq!(quant_scale(Transform::identity(), true), IntPoint::new(4, 1));
        assert_eq!(quant_scale(Transform::from_row(0.0, 1.0, -1.0, 0.0, 0.0, 0.0), true), IntPoint::new(1, 4));
        assert_eq!(quant_scale(Transform::from_row(0.7, 0.7, -0.7, 0.7, 0.0, 0.0), true), IntPoint::new(4, 4));
    }

    #[test]
    fn quarter_pixel_positions_relative_to_first_glyph() {
        let r = run(&[(1, 10.3, 20.0), (2, 17.6, 20.0)]);
        let (glyphs, offset) = quantize_run(&r, Transform::identity(), IntPoint::new(4, 1));
        assert_eq!(offset, IntPoint::new(10, 20));
        assert_eq!(glyphs, vec![(1, IntPoint::new(1, 0)), (2, IntPoint::new(30, 0))]);
        let placed = placed_glyphs(&glyphs, IntPoint::new(4, 1), offset);
        assert_eq!(placed[0].pos, Vec2::new(10.25, 20.0));
        assert_eq!(placed[1].pos, Vec2::new(17.5, 20.0));
    }

    #[test]
    fn negative_positions_floor_to_whole_pixels() {
        let r = run(&[(1, -2.3, 4.0)]);
        let (glyphs, offset) = quantize_run(&r, Transform::identity(), IntPoint::new(4, 1));
        assert_eq!(offset, IntPoint::new(-3, 4));
        assert_eq!(glyphs[0].1, IntPoint::new(3, 0));
    }

    // ── matching ──────────────────────────────────────────────────────────

    #[test]
    fn translated_run_hits() {
        let mut cache = ContentCache::new();
        let (a, _) = key(&run(&[(1, 10.0, 20.0), (2, 18.0, 20.0)]), Transform::identity(), wide());
        let (b, _) = key(&run(&[(1, 110.0, 70.0), (2, 118.0, 70.0)]), Transform::identity(), wide());
        let (id, _) = cache.find_or_insert(a);
        assert_eq!(cache.find(&b), Some(id));
    }

    #[test]
    fn subpixel_shift_misses() {
        let mut cache = ContentCache::new();
        let (a, _) = key(&run(&[(1, 10.0, 20.0), (2, 18.0, 20.0)]), Transform::identity(), wide());
        let (b, _) = key(&run(&[(1, 10.0, 20.0), (2, 18.5, 20.0)]), Transform::identity(), wide());
        cache.insert(a);
        assert!(cache.find(&b).is_none());
    }

    #[test]
    fn clip_change_that_alters_visible_part_misses() {
        let mut cache = ContentCache::new();
        let r = run(&[(1, 10.0, 20.0)]);
        let (clipped, _) = key(&r, Transform::identity(), IntRect::new(0, 0, 15, 100));
        cache.insert(clipped);
        let (unclipped, _) = key(&r, Transform::identity(), wide());
        assert!(cache.find(&unclipped).is_none());
        let (same_clip, _) = key(&r, Transform::identity(), IntRect::new(0, 0, 15, 100));
        assert!(cache.find(&same_clip).is_some());
    }

    #[test]
    fn stroke_is_part_of_the_key() {
        let mut cache = ContentCache::new();
        let (a, _) = key(&run(&[(1, 0.0, 0.0)]), Transform::identity(), wide());
        let stroked = GlyphCacheKey { stroke: Some(StrokeOptions::with_width(1.0)), ..a.clone() };
        cache.insert(a);
        assert!(cache.find(&stroked).is_none());
    }
}
