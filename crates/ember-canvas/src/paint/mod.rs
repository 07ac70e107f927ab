//! Paint model: colors, patterns, compositing and stroke options.
//!
//! Scope:
//! - color representation (premultiplied alpha)
//! - paint sources (solid, surface, linear gradient)
//! - per-draw options consumed by both the GPU and CPU backends
//!
//! Geometry types remain in `coords` and `geom`.

mod color;
mod gradient;
mod options;
mod pattern;

pub use color::Color;
pub use gradient::{ColorStop, LinearGradient, SpreadMode};
pub use options::{
    AntialiasMode, CompositeOp, DrawOptions, LineCap, LineJoin, SamplingFilter, StrokeOptions,
};
pub use pattern::{Pattern, PatternKind, SurfacePattern};
