use crate::coords::{Transform, Vec2};

use super::Color;

/// Behavior outside a gradient's [0, 1] range or a surface pattern's bounds.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SpreadMode {
    /// Clamp to the edge.
    Pad,
    /// Repeat.
    Repeat,
    /// Mirror-repeat.
    Reflect,
}

impl SpreadMode {
    pub(crate) fn to_skia(self) -> tiny_skia::SpreadMode {
        match self {
            SpreadMode::Pad => tiny_skia::SpreadMode::Pad,
            SpreadMode::Repeat => tiny_skia::SpreadMode::Repeat,
            SpreadMode::Reflect => tiny_skia::SpreadMode::Reflect,
        }
    }
}

/// A single gradient stop.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ColorStop {
    pub t: f32,
    pub color: Color,
}

impl ColorStop {
    #[inline]
    pub const fn new(t: f32, color: Color) -> Self {
        Self { t, color }
    }
}

/// Linear gradient in user space.
///
/// Gradients are always rasterized on the CPU; the GPU path bakes them into
/// a texture when a cached path needs them.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearGradient {
    pub start: Vec2,
    pub end: Vec2,
    pub stops: Vec<ColorStop>,
    pub spread: SpreadMode,
}

impl LinearGradient {
    pub fn new(start: Vec2, end: Vec2, stops: Vec<ColorStop>, spread: SpreadMode) -> Self {
        Self { start, end, stops, spread }
    }

    /// Returns true when the gradient definition is structurally usable.
    pub fn is_valid(&self) -> bool {
        self.start.is_finite()
            && self.end.is_finite()
            && self.stops.iter().all(|s| s.t.is_finite() && s.color.is_finite())
            && self.stops.len() >= 2
            && (self.end.x != self.start.x || self.end.y != self.start.y)
    }

    pub(crate) fn to_shader(&self, transform: Transform) -> Option<tiny_skia::Shader<'static>> {
        if !self.is_valid() {
            return None;
        }
        let stops = self
            .stops
            .iter()
            .map(|s| tiny_skia::GradientStop::new(s.t, s.color.to_skia()))
            .collect();
        tiny_skia::LinearGradient::new(
            self.start.to_skia(),
            self.end.to_skia(),
            stops,
            self.spread.to_skia(),
            transform.to_skia(),
        )
    }
}
