use crate::coords::Vec2;

/// A glyph index at a baseline pen position in user space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Glyph {
    pub index: u16,
    pub pos: Vec2,
}

/// Positioned glyphs drawn with one font.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlyphRun {
    pub glyphs: Vec<Glyph>,
}

impl GlyphRun {
    pub fn new(glyphs: Vec<Glyph>) -> Self {
        Self { glyphs }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}
