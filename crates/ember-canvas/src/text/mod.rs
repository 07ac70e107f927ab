//! Fonts, glyph runs and glyph rasterization.

mod font;
pub mod raster;
mod run;

pub use font::{FontId, FontLoadError, FontSystem, GlyphMetrics, GlyphSource, ScaledFont};
pub use run::{Glyph, GlyphRun};

#[cfg(test)]
pub(crate) use font::testing;
