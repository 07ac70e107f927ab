use std::fmt;
use std::sync::Arc;

use crate::coords::Vec2;

use super::{Glyph, GlyphRun};

/// Error returned by [`FontSystem::load_font`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("font load error: {0}")]
pub struct FontLoadError(pub String);

/// Opaque handle to a font registered in a [`FontSystem`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FontId(pub(crate) usize);

/// Placement of one rasterized glyph relative to its pen position.
///
/// `ymin` is the offset of the bitmap's bottom edge from the baseline,
/// positive up.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct GlyphMetrics {
    pub xmin: i32,
    pub ymin: i32,
    pub width: usize,
    pub height: usize,
    pub advance: f32,
}

/// Produces coverage bitmaps for glyph indices at a pixel size.
pub trait GlyphSource: Send + Sync {
    fn metrics(&self, index: u16, px: f32) -> GlyphMetrics;

    /// Row-major 8-bit coverage, `width * height` bytes.
    fn rasterize(&self, index: u16, px: f32) -> (GlyphMetrics, Vec<u8>);

    fn lookup(&self, ch: char) -> u16;
}

fn to_metrics(m: fontdue::Metrics) -> GlyphMetrics {
    GlyphMetrics {
        xmin: m.xmin,
        ymin: m.ymin,
        width: m.width,
        height: m.height,
        advance: m.advance_width,
    }
}

impl GlyphSource for fontdue::Font {
    fn metrics(&self, index: u16, px: f32) -> GlyphMetrics {
        to_metrics(self.metrics_indexed(index, px))
    }

    fn rasterize(&self, index: u16, px: f32) -> (GlyphMetrics, Vec<u8>) {
        let (m, coverage) = self.rasterize_indexed(index, px);
        (to_metrics(m), coverage)
    }

    fn lookup(&self, ch: char) -> u16 {
        self.lookup_glyph_index(ch)
    }
}

/// A font at one size, ready for drawing.
#[derive(Clone)]
pub struct ScaledFont {
    id: FontId,
    size: f32,
    source: Arc<dyn GlyphSource>,
}

impl fmt::Debug for ScaledFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScaledFont").field("id", &self.id).field("size", &self.size).finish()
    }
}

impl ScaledFont {
    #[inline]
    pub fn id(&self) -> FontId {
        self.id
    }

    /// Em size in user-space pixels.
    #[inline]
    pub fn size(&self) -> f32 {
        self.size
    }

    pub(crate) fn source(&self) -> &dyn GlyphSource {
        self.source.as_ref()
    }

    /// Lays `text` out on a single baseline starting at `origin`.
    pub fn shape(&self, text: &str, origin: Vec2) -> GlyphRun {
        let mut pen = origin.x;
        let glyphs = text
            .chars()
            .map(|ch| {
                let index = self.source.lookup(ch);
                let glyph = Glyph { index, pos: Vec2::new(pen, origin.y) };
                pen += self.source.metrics(index, self.size).advance;
                glyph
            })
            .collect();
        GlyphRun { glyphs }
    }
}

/// Owns the loaded fonts.
///
/// Fonts are immutable after loading and shared with every [`ScaledFont`]
/// made from them.
pub struct FontSystem {
    fonts: Vec<Arc<dyn GlyphSource>>,
}

impl FontSystem {
    pub fn new() -> Self {
        Self { fonts: Vec::new() }
    }

    /// Parses and stores a TrueType or OpenType font from raw bytes.
    pub fn load_font(&mut self, bytes: &[u8]) -> Result<FontId, FontLoadError> {
        let font = fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default())
            .map_err(|e| FontLoadError(e.to_string()))?;
        Ok(self.add_source(Arc::new(font)))
    }

    /// Registers a custom glyph rasterizer.
    pub fn add_source(&mut self, source: Arc<dyn GlyphSource>) -> FontId {
        let id = FontId(self.fonts.len());
        self.fonts.push(source);
        id
    }

    pub fn scaled(&self, id: FontId, size: f32) -> Option<ScaledFont> {
        let source = Arc::clone(self.fonts.get(id.0)?);
        Some(ScaledFont { id, size, source })
    }

    /// Advance width and line height of `text` on one baseline.
    #[must_use]
    pub fn measure_text(&self, text: &str, id: FontId, size: f32) -> Vec2 {
        let Some(font) = self.fonts.get(id.0) else {
            return Vec2::new(0.0, size * 1.2);
        };
        let width = text.chars().map(|ch| font.metrics(font.lookup(ch), size).advance).sum();
        Vec2::new(width, size * 1.2)
    }
}

impl Default for FontSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Glyph `i` is a solid box `i` px wide and `size` px tall sitting on the
    /// baseline; advance is `i + 1`. Index 0 is blank.
    pub(crate) struct BoxGlyphs;

    impl GlyphSource for BoxGlyphs {
        fn metrics(&self, index: u16, px: f32) -> GlyphMetrics {
            GlyphMetrics {
                xmin: 0,
                ymin: 0,
                width: index as usize,
                height: if index == 0 { 0 } else { px.round() as usize },
                advance: index as f32 + 1.0,
            }
        }

        fn rasterize(&self, index: u16, px: f32) -> (GlyphMetrics, Vec<u8>) {
            let m = self.metrics(index, px);
            (m, vec![255; m.width * m.height])
        }

        fn lookup(&self, ch: char) -> u16 {
            ch.to_digit(10).map_or(0, |d| d as u16)
        }
    }

    pub(crate) fn box_font(size: f32) -> ScaledFont {
        let mut fonts = FontSystem::new();
        let id = fonts.add_source(Arc::new(BoxGlyphs));
        fonts.scaled(id, size).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::box_font;
    use super::*;

    #[test]
    fn garbage_bytes_fail_to_load() {
        let mut fonts = FontSystem::new();
        assert!(fonts.load_font(b"not a font").is_err());
    }

    #[test]
    fn unknown_id_has_no_scaled_font() {
        assert!(FontSystem::new().scaled(FontId(3), 12.0).is_none());
    }

    #[test]
    fn shape_advances_pen() {
        let run = box_font(10.0).shape("23", Vec2::new(5.0, 20.0));
        assert_eq!(run.glyphs.len(), 2);
        assert_eq!(run.glyphs[0], Glyph { index: 2, pos: Vec2::new(5.0, 20.0) });
        assert_eq!(run.glyphs[1].pos, Vec2::new(8.0, 20.0));
    }
}
