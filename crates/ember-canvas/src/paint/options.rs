/// Porter-Duff and separable blend operators.
///
/// Only `Over`, `Add`, `Atop` and `Source` have GPU blend states; the rest
/// always route to the CPU surface.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum CompositeOp {
    #[default]
    Over,
    Add,
    Atop,
    Source,
    In,
    Out,
    Xor,
    DestOver,
    DestIn,
    DestOut,
    DestAtop,
    Clear,
    Multiply,
    Screen,
    Darken,
    Lighten,
}

impl CompositeOp {
    /// True when the op maps onto a fixed-function GPU blend state.
    #[inline]
    pub fn is_gpu_blend(self) -> bool {
        matches!(self, CompositeOp::Over | CompositeOp::Add | CompositeOp::Atop | CompositeOp::Source)
    }

    /// True when a CPU draw with this op can be layered over the GPU
    /// framebuffer and merged later with a plain OVER.
    #[inline]
    pub fn supports_layering(self) -> bool {
        self == CompositeOp::Over
    }

    /// Ops that can modify destination pixels outside the drawn shape.
    #[inline]
    pub fn is_unbounded(self) -> bool {
        matches!(self, CompositeOp::Source | CompositeOp::In | CompositeOp::DestIn | CompositeOp::DestAtop)
    }

    pub(crate) fn to_skia(self) -> tiny_skia::BlendMode {
        use tiny_skia::BlendMode as B;
        match self {
            CompositeOp::Over => B::SourceOver,
            CompositeOp::Add => B::Plus,
            CompositeOp::Atop => B::SourceAtop,
            CompositeOp::Source => B::Source,
            CompositeOp::In => B::SourceIn,
            CompositeOp::Out => B::SourceOut,
            CompositeOp::Xor => B::Xor,
            CompositeOp::DestOver => B::DestinationOver,
            CompositeOp::DestIn => B::DestinationIn,
            CompositeOp::DestOut => B::DestinationOut,
            CompositeOp::DestAtop => B::DestinationAtop,
            CompositeOp::Clear => B::Clear,
            CompositeOp::Multiply => B::Multiply,
            CompositeOp::Screen => B::Screen,
            CompositeOp::Darken => B::Darken,
            CompositeOp::Lighten => B::Lighten,
        }
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum AntialiasMode {
    None,
    #[default]
    Default,
}

impl AntialiasMode {
    #[inline]
    pub fn is_enabled(self) -> bool {
        self != AntialiasMode::None
    }
}

/// Per-draw options shared by every drawing call.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DrawOptions {
    pub alpha: f32,
    pub op: CompositeOp,
    pub aa: AntialiasMode,
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self { alpha: 1.0, op: CompositeOp::Over, aa: AntialiasMode::Default }
    }
}

impl DrawOptions {
    pub fn with_op(op: CompositeOp) -> Self {
        Self { op, ..Self::default() }
    }

    pub fn with_alpha(alpha: f32) -> Self {
        Self { alpha, ..Self::default() }
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum SamplingFilter {
    #[default]
    Linear,
    Point,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum LineJoin {
    #[default]
    Miter,
    Round,
    Bevel,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    Square,
}

/// Stroke geometry parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeOptions {
    pub width: f32,
    pub miter_limit: f32,
    pub join: LineJoin,
    pub cap: LineCap,
    pub dash: Vec<f32>,
    pub dash_offset: f32,
}

impl Default for StrokeOptions {
    fn default() -> Self {
        Self {
            width: 1.0,
            miter_limit: 10.0,
            join: LineJoin::Miter,
            cap: LineCap::Butt,
            dash: Vec::new(),
            dash_offset: 0.0,
        }
    }
}

impl StrokeOptions {
    pub fn with_width(width: f32) -> Self {
        Self { width, ..Self::default() }
    }

    #[inline]
    pub fn is_dashed(&self) -> bool {
        !self.dash.is_empty()
    }

    /// Distance the stroke can extend past the path bounds.
    pub fn outset(&self) -> f32 {
        let half = self.width.max(0.0) * 0.5;
        match (self.join, self.cap) {
            (LineJoin::Miter, _) => half * self.miter_limit.max(1.0),
            (_, LineCap::Square) => half * std::f32::consts::SQRT_2,
            _ => half,
        }
    }

    pub(crate) fn to_skia(&self) -> tiny_skia::Stroke {
        let dash = if self.dash.is_empty() {
            None
        } else {
            tiny_skia::StrokeDash::new(self.dash.clone(), self.dash_offset)
        };
        tiny_skia::Stroke {
            width: self.width,
            miter_limit: self.miter_limit,
            line_cap: match self.cap {
                LineCap::Butt => tiny_skia::LineCap::Butt,
                LineCap::Round => tiny_skia::LineCap::Round,
                LineCap::Square => tiny_skia::LineCap::Square,
            },
            line_join: match self.join {
                LineJoin::Miter => tiny_skia::LineJoin::Miter,
                LineJoin::Round => tiny_skia::LineJoin::Round,
                LineJoin::Bevel => tiny_skia::LineJoin::Bevel,
            },
            dash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_blend_set() {
        assert!(CompositeOp::Over.is_gpu_blend());
        assert!(CompositeOp::Source.is_gpu_blend());
        assert!(!CompositeOp::Multiply.is_gpu_blend());
        assert!(!CompositeOp::DestOver.is_gpu_blend());
    }

    #[test]
    fn only_over_layers() {
        assert!(CompositeOp::Over.supports_layering());
        assert!(!CompositeOp::Add.supports_layering());
    }

    #[test]
    fn stroke_outset_uses_miter_limit() {
        let s = StrokeOptions { width: 2.0, miter_limit: 4.0, ..StrokeOptions::default() };
        assert_eq!(s.outset(), 4.0);
        let round = StrokeOptions { join: LineJoin::Round, ..s };
        assert_eq!(round.outset(), 1.0);
    }
}
