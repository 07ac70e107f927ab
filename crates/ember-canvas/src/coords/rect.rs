use super::{IntRect, Vec2};

/// Axis-aligned rectangle in device pixels (top-left origin).
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Rect {
    pub origin: Vec2,
    pub size: Vec2,
}

impl Rect {
    #[inline]
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            origin: Vec2::new(x, y),
            size: Vec2::new(w, h),
        }
    }

    #[inline]
    pub const fn from_origin_size(origin: Vec2, size: Vec2) -> Self {
        Self { origin, size }
    }

    /// Builds a rect from its left/top/right/bottom edges.
    #[inline]
    pub fn from_ltrb(l: f32, t: f32, r: f32, b: f32) -> Self {
        Self::new(l, t, r - l, b - t)
    }

    #[inline]
    pub fn min(self) -> Vec2 {
        self.origin
    }

    #[inline]
    pub fn max(self) -> Vec2 {
        Vec2::new(self.origin.x + self.size.x, self.origin.y + self.size.y)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.size.x <= 0.0 || self.size.y <= 0.0
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.origin.is_finite() && self.size.is_finite()
    }

    /// Normalizes the rectangle so width/height are non-negative.
    #[inline]
    pub fn normalized(self) -> Self {
        let mut x = self.origin.x;
        let mut y = self.origin.y;
        let mut w = self.size.x;
        let mut h = self.size.y;

        if w < 0.0 {
            x += w;
            w = -w;
        }
        if h < 0.0 {
            y += h;
            h = -h;
        }

        Rect::new(x, y, w, h)
    }

    /// Half-open containment: [min, max).
    #[inline]
    pub fn contains(self, p: Vec2) -> bool {
        let r = self.normalized();
        p.x >= r.origin.x
            && p.y >= r.origin.y
            && p.x < (r.origin.x + r.size.x)
            && p.y < (r.origin.y + r.size.y)
    }

    /// True when `other` lies entirely inside `self` (edges inclusive).
    #[inline]
    pub fn contains_rect(self, other: Rect) -> bool {
        let a = self.normalized();
        let b = other.normalized();
        b.origin.x >= a.origin.x
            && b.origin.y >= a.origin.y
            && b.max().x <= a.max().x
            && b.max().y <= a.max().y
    }

    #[inline]
    pub fn intersect(self, other: Rect) -> Option<Rect> {
        let a = self.normalized();
        let b = other.normalized();

        let x0 = a.origin.x.max(b.origin.x);
        let y0 = a.origin.y.max(b.origin.y);
        let x1 = (a.origin.x + a.size.x).min(b.origin.x + b.size.x);
        let y1 = (a.origin.y + a.size.y).min(b.origin.y + b.size.y);

        let w = x1 - x0;
        let h = y1 - y0;

        if w <= 0.0 || h <= 0.0 {
            None
        } else {
            Some(Rect::new(x0, y0, w, h))
        }
    }

    /// Smallest rect covering both inputs. Empty inputs are ignored.
    pub fn union(self, other: Rect) -> Rect {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let (a, b) = (self.normalized(), other.normalized());
        Rect::from_ltrb(
            a.origin.x.min(b.origin.x),
            a.origin.y.min(b.origin.y),
            a.max().x.max(b.max().x),
            a.max().y.max(b.max().y),
        )
    }

    #[inline]
    pub fn translate(self, d: Vec2) -> Rect {
        Rect::from_origin_size(self.origin + d, self.size)
    }

    /// Grows the rect by `d` on every side.
    #[inline]
    pub fn inflate(self, d: f32) -> Rect {
        Rect::new(
            self.origin.x - d,
            self.origin.y - d,
            self.size.x + 2.0 * d,
            self.size.y + 2.0 * d,
        )
    }

    #[inline]
    pub fn scale(self, sx: f32, sy: f32) -> Rect {
        Rect::new(self.origin.x * sx, self.origin.y * sy, self.size.x * sx, self.size.y * sy)
    }

    /// Smallest integer rect enclosing this one.
    pub fn round_out(self) -> IntRect {
        let r = self.normalized();
        let x0 = r.origin.x.floor();
        let y0 = r.origin.y.floor();
        let x1 = r.max().x.ceil();
        let y1 = r.max().y.ceil();
        IntRect::from_ltrb(x0 as i32, y0 as i32, x1 as i32, y1 as i32)
    }

    /// Nearest integer rect, rounding each edge independently.
    pub fn round(self) -> IntRect {
        let r = self.normalized();
        IntRect::from_ltrb(
            r.origin.x.round() as i32,
            r.origin.y.round() as i32,
            r.max().x.round() as i32,
            r.max().y.round() as i32,
        )
    }

    /// True when every edge is within `eps` of an integer.
    pub fn is_integer(self, eps: f32) -> bool {
        let near = |v: f32| (v - v.round()).abs() <= eps;
        near(self.origin.x) && near(self.origin.y) && near(self.max().x) && near(self.max().y)
    }

    pub fn to_skia(self) -> Option<tiny_skia::Rect> {
        let r = self.normalized();
        tiny_skia::Rect::from_xywh(r.origin.x, r.origin.y, r.size.x, r.size.y)
    }
}

impl From<IntRect> for Rect {
    fn from(r: IntRect) -> Self {
        Rect::new(r.x as f32, r.y as f32, r.width as f32, r.height as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(x: f32, y: f32, w: f32, h: f32) -> Rect { Rect::new(x, y, w, h) }

    // ── normalized ────────────────────────────────────────────────────────

    #[test]
    fn normalized_negative_width() {
        let n = r(10.0, 0.0, -4.0, 5.0).normalized();
        assert_eq!(n.origin.x, 6.0);
        assert_eq!(n.size.x, 4.0);
    }

    // ── intersect / union ─────────────────────────────────────────────────

    #[test]
    fn intersect_overlapping() {
        let i = r(0.0, 0.0, 10.0, 10.0).intersect(r(5.0, 5.0, 10.0, 10.0)).unwrap();
        assert_eq!(i, r(5.0, 5.0, 5.0, 5.0));
    }

    #[test]
    fn intersect_touching_edge_returns_none() {
        assert!(r(0.0, 0.0, 10.0, 10.0).intersect(r(10.0, 0.0, 10.0, 10.0)).is_none());
    }

    #[test]
    fn union_covers_both() {
        let u = r(0.0, 0.0, 2.0, 2.0).union(r(5.0, 1.0, 1.0, 4.0));
        assert_eq!(u, r(0.0, 0.0, 6.0, 5.0));
    }

    #[test]
    fn union_ignores_empty() {
        let a = r(1.0, 1.0, 2.0, 2.0);
        assert_eq!(a.union(Rect::default()), a);
        assert_eq!(Rect::default().union(a), a);
    }

    #[test]
    fn contains_rect_edges_inclusive() {
        let outer = r(0.0, 0.0, 10.0, 10.0);
        assert!(outer.contains_rect(outer));
        assert!(outer.contains_rect(r(2.0, 2.0, 3.0, 3.0)));
        assert!(!outer.contains_rect(r(8.0, 8.0, 3.0, 3.0)));
    }

    // ── rounding ──────────────────────────────────────────────────────────

    #[test]
    fn round_out_encloses_fractional_edges() {
        let i = r(0.5, 1.25, 2.0, 2.0).round_out();
        assert_eq!(i, IntRect::new(0, 1, 3, 3));
    }

    #[test]
    fn is_integer_tolerates_epsilon() {
        assert!(r(1.0005, 2.0, 3.0, 4.0).is_integer(1e-3));
        assert!(!r(1.25, 2.0, 3.0, 4.0).is_integer(1e-3));
    }

    #[test]
    fn inflate_grows_every_side() {
        assert_eq!(r(2.0, 2.0, 4.0, 4.0).inflate(1.0), r(1.0, 1.0, 6.0, 6.0));
    }
}
