use crate::coords::{Transform, Vec2};

use super::{FillRule, Path};

/// Sub-pixel resolution of quantized coordinates (1/16 px).
pub const QUANT_SCALE: f32 = 16.0;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
enum Verb {
    Move,
    Line,
    Quad,
    Cubic,
    Close,
}

/// Device-space path snapped to a 1/16 px grid relative to an origin.
///
/// Two draws of the same shape at different integer offsets quantize to the
/// same value, which is what lets the path cache reuse a rasterization.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct QuantizedPath {
    verbs: Vec<Verb>,
    points: Vec<[i32; 2]>,
    fill_rule: FillRule,
}

impl QuantizedPath {
    /// Quantizes `path` mapped by `transform`, relative to `origin` (device space).
    pub fn new(path: &Path, transform: Transform, origin: Vec2) -> Self {
        let verbs = path
            .verbs()
            .iter()
            .map(|v| match v {
                tiny_skia_path::PathVerb::Move => Verb::Move,
                tiny_skia_path::PathVerb::Line => Verb::Line,
                tiny_skia_path::PathVerb::Quad => Verb::Quad,
                tiny_skia_path::PathVerb::Cubic => Verb::Cubic,
                tiny_skia_path::PathVerb::Close => Verb::Close,
            })
            .collect();
        let points = path
            .points()
            .map(|p| {
                let d = transform.map_point(p) - origin;
                [(d.x * QUANT_SCALE).round() as i32, (d.y * QUANT_SCALE).round() as i32]
            })
            .collect();
        Self { verbs, points, fill_rule: path.fill_rule() }
    }

    #[inline]
    pub fn verb_count(&self) -> usize {
        self.verbs.len()
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn fill_rule(&self) -> FillRule {
        self.fill_rule
    }
}
