use crate::coords::{Rect, Transform, Vec2};
use crate::paint::StrokeOptions;

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum FillRule {
    #[default]
    NonZero,
    EvenOdd,
}

impl FillRule {
    pub(crate) fn to_skia(self) -> tiny_skia::FillRule {
        match self {
            FillRule::NonZero => tiny_skia::FillRule::Winding,
            FillRule::EvenOdd => tiny_skia::FillRule::EvenOdd,
        }
    }
}

/// Immutable user-space path with its fill rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    inner: tiny_skia::Path,
    fill_rule: FillRule,
}

impl Path {
    pub fn from_skia(inner: tiny_skia::Path, fill_rule: FillRule) -> Self {
        Self { inner, fill_rule }
    }

    pub fn rect(rect: Rect) -> Option<Self> {
        Some(Self::from_skia(tiny_skia::PathBuilder::from_rect(rect.to_skia()?), FillRule::NonZero))
    }

    pub fn line(from: Vec2, to: Vec2) -> Option<Self> {
        let mut pb = PathBuilder::new();
        pb.move_to(from);
        pb.line_to(to);
        pb.finish(FillRule::NonZero)
    }

    #[inline]
    pub fn skia(&self) -> &tiny_skia::Path {
        &self.inner
    }

    #[inline]
    pub fn fill_rule(&self) -> FillRule {
        self.fill_rule
    }

    pub fn bounds(&self) -> Rect {
        let b = self.inner.bounds();
        Rect::new(b.x(), b.y(), b.width(), b.height())
    }

    #[inline]
    pub fn verb_count(&self) -> usize {
        self.inner.verbs().len()
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.inner.points().len()
    }

    pub(crate) fn verbs(&self) -> &[tiny_skia_path::PathVerb] {
        self.inner.verbs()
    }

    pub(crate) fn points(&self) -> impl Iterator<Item = Vec2> + '_ {
        self.inner.points().iter().map(|&p| Vec2::from(p))
    }

    /// Returns the rect when the path is a single closed axis-aligned rectangle.
    pub fn as_rect(&self) -> Option<Rect> {
        use tiny_skia_path::PathVerb as V;
        let verbs = self.inner.verbs();
        let pts = self.inner.points();
        let shape_ok = matches!(
            verbs,
            [V::Move, V::Line, V::Line, V::Line, V::Close]
                | [V::Move, V::Line, V::Line, V::Line, V::Line, V::Close]
        );
        if !shape_ok || pts.len() < 4 {
            return None;
        }
        if pts.len() == 5 && pts[4] != pts[0] {
            return None;
        }
        let (p0, p1, p2, p3) = (pts[0], pts[1], pts[2], pts[3]);
        let horizontal_first = p0.y == p1.y && p1.x == p2.x && p2.y == p3.y && p3.x == p0.x;
        let vertical_first = p0.x == p1.x && p1.y == p2.y && p2.x == p3.x && p3.y == p0.y;
        if !horizontal_first && !vertical_first {
            return None;
        }
        let r = self.bounds();
        (!r.is_empty()).then_some(r)
    }

    /// Returns the endpoints when the path is one open line segment.
    pub fn as_line(&self) -> Option<(Vec2, Vec2)> {
        use tiny_skia_path::PathVerb as V;
        match (self.inner.verbs(), self.inner.points()) {
            ([V::Move, V::Line], [a, b]) => Some((Vec2::from(*a), Vec2::from(*b))),
            _ => None,
        }
    }

    pub fn transform(&self, t: Transform) -> Option<Path> {
        let inner = self.inner.clone().transform(t.to_skia())?;
        Some(Self::from_skia(inner, self.fill_rule))
    }

    /// Outline of the stroke as a fillable (non-zero) path.
    pub fn stroke_outline(&self, stroke: &StrokeOptions, res_scale: f32) -> Option<Path> {
        let outline = self.inner.stroke(&stroke.to_skia(), res_scale)?;
        Some(Self::from_skia(outline, FillRule::NonZero))
    }
}

/// Incremental path construction in user space.
#[derive(Debug, Default)]
pub struct PathBuilder {
    inner: tiny_skia::PathBuilder,
}

impl PathBuilder {
    pub fn new() -> Self {
        Self { inner: tiny_skia::PathBuilder::new() }
    }

    pub fn move_to(&mut self, p: Vec2) {
        self.inner.move_to(p.x, p.y);
    }

    pub fn line_to(&mut self, p: Vec2) {
        self.inner.line_to(p.x, p.y);
    }

    pub fn quad_to(&mut self, c: Vec2, p: Vec2) {
        self.inner.quad_to(c.x, c.y, p.x, p.y);
    }

    pub fn cubic_to(&mut self, c1: Vec2, c2: Vec2, p: Vec2) {
        self.inner.cubic_to(c1.x, c1.y, c2.x, c2.y, p.x, p.y);
    }

    pub fn close(&mut self) {
        self.inner.close();
    }

    /// Returns `None` for empty or degenerate paths.
    pub fn finish(self, fill_rule: FillRule) -> Option<Path> {
        Some(Path::from_skia(self.inner.finish()?, fill_rule))
    }
}
