use crate::coords::{IntRect, IntSize, Transform};
use crate::surface::SourceSurface;

use super::{Color, LinearGradient, SamplingFilter, SpreadMode};

/// Image source for fills: a surface mapped into user space.
#[derive(Debug, Clone)]
pub struct SurfacePattern {
    pub surface: SourceSurface,
    pub extend: SpreadMode,
    /// Pattern space → user space.
    pub matrix: Transform,
    pub filter: SamplingFilter,
    /// Restricts sampling to a sub-rect of the surface.
    pub sampling_rect: Option<IntRect>,
}

impl SurfacePattern {
    pub fn new(surface: SourceSurface) -> Self {
        Self {
            surface,
            extend: SpreadMode::Pad,
            matrix: Transform::identity(),
            filter: SamplingFilter::Linear,
            sampling_rect: None,
        }
    }

    pub fn with_matrix(mut self, matrix: Transform) -> Self {
        self.matrix = matrix;
        self
    }

    /// The region actually sampled.
    pub fn source_rect(&self) -> IntRect {
        let full = IntRect::from_size(self.surface.size());
        match self.sampling_rect {
            Some(r) => r.intersect(full),
            None => full,
        }
    }
}

/// Paint source for every drawing operation.
#[derive(Debug, Clone)]
pub enum Pattern {
    Color(Color),
    Surface(SurfacePattern),
    LinearGradient(LinearGradient),
}

/// Discriminant of [`Pattern`], part of the path cache hash.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PatternKind {
    Color,
    Surface,
    LinearGradient,
}

impl From<Color> for Pattern {
    fn from(c: Color) -> Self {
        Pattern::Color(c)
    }
}

impl Pattern {
    #[inline]
    pub fn kind(&self) -> PatternKind {
        match self {
            Pattern::Color(_) => PatternKind::Color,
            Pattern::Surface(_) => PatternKind::Surface,
            Pattern::LinearGradient(_) => PatternKind::LinearGradient,
        }
    }

    #[inline]
    pub fn as_color(&self) -> Option<Color> {
        match self {
            Pattern::Color(c) => Some(*c),
            _ => None,
        }
    }

    /// Size of the surface the GPU would have to hold to sample this pattern.
    pub fn surface_size(&self) -> Option<IntSize> {
        match self {
            Pattern::Surface(p) => Some(p.source_rect().size()),
            _ => None,
        }
    }

    /// Copies the sampled region of a surface pattern into a pixmap.
    pub(crate) fn surface_pixmap(&self) -> Option<tiny_skia::Pixmap> {
        let Pattern::Surface(p) = self else { return None };
        let pixmap = p.surface.to_pixmap()?;
        match p.sampling_rect {
            Some(_) => pixmap.clone_rect(p.source_rect().to_skia()?),
            None => Some(pixmap),
        }
    }

    /// Builds the CPU shader. `pixmap` must come from [`Pattern::surface_pixmap`]
    /// for surface patterns and is ignored otherwise.
    pub(crate) fn to_shader<'a>(
        &self,
        pixmap: Option<&'a tiny_skia::Pixmap>,
        alpha: f32,
    ) -> Option<tiny_skia::Shader<'a>> {
        match self {
            Pattern::Color(c) => Some(tiny_skia::Shader::SolidColor(c.scale_alpha(alpha).to_skia())),
            Pattern::LinearGradient(g) => {
                let mut faded = g.clone();
                for stop in &mut faded.stops {
                    stop.color = stop.color.scale_alpha(alpha);
                }
                faded.to_shader(Transform::identity())
            }
            Pattern::Surface(p) => {
                let pixmap = pixmap?;
                let origin = p.source_rect();
                let matrix = p.matrix.pre_translate(origin.x as f32, origin.y as f32);
                let quality = match p.filter {
                    SamplingFilter::Linear => tiny_skia::FilterQuality::Bilinear,
                    SamplingFilter::Point => tiny_skia::FilterQuality::Nearest,
                };
                Some(tiny_skia::Pattern::new(
                    pixmap.as_ref(),
                    p.extend.to_skia(),
                    quality,
                    alpha.clamp(0.0, 1.0),
                    matrix.to_skia(),
                ))
            }
        }
    }
}
