use crate::coords::{IntRect, IntSize, Transform};
use crate::geom::QuantizedPath;
use crate::paint::{LinearGradient, Pattern, PatternKind, SamplingFilter, SpreadMode, StrokeOptions};

use super::{hash_content, CacheKey};

/// Linear parts closer than this reuse the same rasterization.
const LINEAR_EPSILON: f32 = 1e-4;

/// Identity of a paint source baked into a cached image.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternSource {
    Surface {
        id: u64,
        extend: SpreadMode,
        filter: SamplingFilter,
        sampling_rect: IntRect,
    },
    Gradient(LinearGradient),
}

/// A non-solid pattern as seen from a cached image.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternKey {
    pub source: PatternSource,
    /// Pattern space → cached image space.
    pub transform: Transform,
    pub alpha: f32,
}

impl PatternKey {
    /// `None` for solid colors, which are applied at draw time instead.
    pub fn new(pattern: &Pattern, user_to_image: Transform, alpha: f32) -> Option<Self> {
        match pattern {
            Pattern::Color(_) => None,
            Pattern::Surface(p) => Some(Self {
                source: PatternSource::Surface {
                    id: p.surface.id(),
                    extend: p.extend,
                    filter: p.filter,
                    sampling_rect: p.source_rect(),
                },
                transform: user_to_image.pre_concat(p.matrix),
                alpha,
            }),
            Pattern::LinearGradient(g) => Some(Self {
                source: PatternSource::Gradient(g.clone()),
                transform: user_to_image,
                alpha,
            }),
        }
    }

    fn kind(&self) -> PatternKind {
        match self.source {
            PatternSource::Surface { .. } => PatternKind::Surface,
            PatternSource::Gradient(_) => PatternKind::LinearGradient,
        }
    }
}

/// Key of a rasterized path.
///
/// Geometry is compared after quantization to a 1/16 px grid relative to a
/// 1/4 px snapped origin, so the same shape drawn at another offset hits.
#[derive(Debug, Clone, PartialEq)]
pub struct PathCacheKey {
    pub path: QuantizedPath,
    /// User → device transform; only its linear part is compared.
    pub transform: Transform,
    /// Snapped origin minus the integer bounds origin, in 1/16 px.
    pub origin_offset: [i32; 2],
    /// Unclipped device bounds size.
    pub full_size: IntSize,
    /// Clipped device bounds, relative to the integer origin.
    pub bounds: IntRect,
    pub pattern: Option<PatternKey>,
    pub stroke: Option<StrokeOptions>,
    /// Blur radius; negative means none.
    pub sigma: f32,
    pub aa: bool,
}

impl CacheKey for PathCacheKey {
    fn content_hash(&self) -> u64 {
        let fields = (
            self.path.verb_count(),
            self.path.point_count(),
            self.origin_offset,
            self.full_size,
            self.pattern.as_ref().map(PatternKey::kind),
        );
        hash_content(&fields)
    }

    fn matches(stored: &Self, query: &Self) -> bool {
        stored.path == query.path
            && stored.origin_offset == query.origin_offset
            && stored.full_size == query.full_size
            && stored.transform.fuzzy_linear_eq(query.transform, LINEAR_EPSILON)
            && stored.bounds.contains(query.bounds)
            && stored.pattern == query.pattern
            && stored.stroke == query.stroke
            && stored.sigma.to_bits() == query.sigma.to_bits()
            && stored.aa == query.aa
    }
}
