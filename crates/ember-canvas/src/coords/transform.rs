use super::{Rect, Vec2};

/// 2D affine transform.
///
/// Maps `(x, y)` to `(sx*x + kx*y + tx, ky*x + sy*y + ty)`. The field order
/// follows `tiny_skia::Transform::from_row` so conversion is a plain copy.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transform {
    pub sx: f32,
    pub ky: f32,
    pub kx: f32,
    pub sy: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    #[inline]
    pub const fn from_row(sx: f32, ky: f32, kx: f32, sy: f32, tx: f32, ty: f32) -> Self {
        Self { sx, ky, kx, sy, tx, ty }
    }

    #[inline]
    pub const fn identity() -> Self {
        Self::from_row(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    #[inline]
    pub const fn translation(tx: f32, ty: f32) -> Self {
        Self::from_row(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    #[inline]
    pub const fn scale(sx: f32, sy: f32) -> Self {
        Self::from_row(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Maps a rect onto another, axis-aligned.
    pub fn rect_to_rect(from: Rect, to: Rect) -> Option<Self> {
        if from.size.x == 0.0 || from.size.y == 0.0 {
            return None;
        }
        let sx = to.size.x / from.size.x;
        let sy = to.size.y / from.size.y;
        Some(Self::from_row(
            sx,
            0.0,
            0.0,
            sy,
            to.origin.x - from.origin.x * sx,
            to.origin.y - from.origin.y * sy,
        ))
    }

    /// `self * other`: `other` is applied first.
    pub fn pre_concat(self, other: Transform) -> Transform {
        let a = self;
        let b = other;
        Transform {
            sx: a.sx * b.sx + a.kx * b.ky,
            ky: a.ky * b.sx + a.sy * b.ky,
            kx: a.sx * b.kx + a.kx * b.sy,
            sy: a.ky * b.kx + a.sy * b.sy,
            tx: a.sx * b.tx + a.kx * b.ty + a.tx,
            ty: a.ky * b.tx + a.sy * b.ty + a.ty,
        }
    }

    /// `other * self`: `self` is applied first.
    #[inline]
    pub fn post_concat(self, other: Transform) -> Transform {
        other.pre_concat(self)
    }

    #[inline]
    pub fn pre_translate(self, tx: f32, ty: f32) -> Transform {
        self.pre_concat(Transform::translation(tx, ty))
    }

    #[inline]
    pub fn post_translate(self, tx: f32, ty: f32) -> Transform {
        self.post_concat(Transform::translation(tx, ty))
    }

    #[inline]
    pub fn post_scale(self, sx: f32, sy: f32) -> Transform {
        self.post_concat(Transform::scale(sx, sy))
    }

    pub fn invert(self) -> Option<Transform> {
        let det = self.sx * self.sy - self.kx * self.ky;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        Some(Transform {
            sx: self.sy * inv,
            ky: -self.ky * inv,
            kx: -self.kx * inv,
            sy: self.sx * inv,
            tx: (self.kx * self.ty - self.sy * self.tx) * inv,
            ty: (self.ky * self.tx - self.sx * self.ty) * inv,
        })
    }

    #[inline]
    pub fn map_point(self, p: Vec2) -> Vec2 {
        Vec2::new(
            self.sx * p.x + self.kx * p.y + self.tx,
            self.ky * p.x + self.sy * p.y + self.ty,
        )
    }

    /// Maps only the linear part (no translation).
    #[inline]
    pub fn map_vector(self, v: Vec2) -> Vec2 {
        Vec2::new(self.sx * v.x + self.kx * v.y, self.ky * v.x + self.sy * v.y)
    }

    /// Axis-aligned bounds of the mapped rect.
    pub fn map_rect_bounds(self, r: Rect) -> Rect {
        let r = r.normalized();
        let corners = [
            self.map_point(r.min()),
            self.map_point(Vec2::new(r.max().x, r.origin.y)),
            self.map_point(r.max()),
            self.map_point(Vec2::new(r.origin.x, r.max().y)),
        ];
        let mut lo = corners[0];
        let mut hi = corners[0];
        for c in &corners[1..] {
            lo = Vec2::new(lo.x.min(c.x), lo.y.min(c.y));
            hi = Vec2::new(hi.x.max(c.x), hi.y.max(c.y));
        }
        Rect::from_ltrb(lo.x, lo.y, hi.x, hi.y)
    }

    #[inline]
    pub fn is_identity(self) -> bool {
        self == Self::identity()
    }

    #[inline]
    pub fn is_translation(self) -> bool {
        self.sx == 1.0 && self.sy == 1.0 && self.kx == 0.0 && self.ky == 0.0
    }

    /// True when axis-aligned rects stay axis-aligned (scale, flip or 90° turns).
    #[inline]
    pub fn preserves_axis_aligned_rects(self) -> bool {
        (self.kx == 0.0 && self.ky == 0.0) || (self.sx == 0.0 && self.sy == 0.0)
    }

    /// Pure translation by whole pixels.
    #[inline]
    pub fn has_only_integer_translation(self) -> bool {
        self.is_translation() && self.tx == self.tx.round() && self.ty == self.ty.round()
    }

    /// Compares the linear parts within `eps`.
    pub fn fuzzy_linear_eq(self, other: Transform, eps: f32) -> bool {
        (self.sx - other.sx).abs() <= eps
            && (self.ky - other.ky).abs() <= eps
            && (self.kx - other.kx).abs() <= eps
            && (self.sy - other.sy).abs() <= eps
    }

    /// Length of the mapped unit axes.
    pub fn scale_factors(self) -> Vec2 {
        Vec2::new(self.sx.hypot(self.ky), self.kx.hypot(self.sy))
    }

    pub fn is_finite(self) -> bool {
        [self.sx, self.ky, self.kx, self.sy, self.tx, self.ty]
            .iter()
            .all(|v| v.is_finite())
    }

    #[inline]
    pub fn to_skia(self) -> tiny_skia::Transform {
        tiny_skia::Transform::from_row(self.sx, self.ky, self.kx, self.sy, self.tx, self.ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec2, b: Vec2) -> bool {
        (a.x - b.x).abs() < 1e-4 && (a.y - b.y).abs() < 1e-4
    }

    // ── concat ────────────────────────────────────────────────────────────

    #[test]
    fn pre_concat_applies_argument_first() {
        let t = Transform::translation(10.0, 0.0).pre_concat(Transform::scale(2.0, 2.0));
        assert!(approx(t.map_point(Vec2::new(1.0, 1.0)), Vec2::new(12.0, 2.0)));
    }

    #[test]
    fn post_concat_applies_argument_last() {
        let t = Transform::translation(10.0, 0.0).post_concat(Transform::scale(2.0, 2.0));
        assert!(approx(t.map_point(Vec2::new(1.0, 1.0)), Vec2::new(22.0, 2.0)));
    }

    // ── invert ────────────────────────────────────────────────────────────

    #[test]
    fn invert_undoes_mapping() {
        let t = Transform::from_row(2.0, 0.5, -0.25, 3.0, 7.0, -4.0);
        let inv = t.invert().unwrap();
        let p = Vec2::new(3.5, -2.0);
        assert!(approx(inv.map_point(t.map_point(p)), p));
    }

    #[test]
    fn invert_singular_is_none() {
        assert!(Transform::scale(0.0, 1.0).invert().is_none());
    }

    // ── classification ────────────────────────────────────────────────────

    #[test]
    fn rotation_by_90_preserves_axis_alignment() {
        let t = Transform::from_row(0.0, 1.0, -1.0, 0.0, 0.0, 0.0);
        assert!(t.preserves_axis_aligned_rects());
        assert!(!Transform::from_row(1.0, 0.2, 0.0, 1.0, 0.0, 0.0).preserves_axis_aligned_rects());
    }

    #[test]
    fn integer_translation_detection() {
        assert!(Transform::translation(3.0, -2.0).has_only_integer_translation());
        assert!(!Transform::translation(3.5, 0.0).has_only_integer_translation());
        assert!(!Transform::scale(2.0, 2.0).has_only_integer_translation());
    }

    #[test]
    fn map_rect_bounds_of_rotation() {
        let t = Transform::from_row(0.0, 1.0, -1.0, 0.0, 0.0, 0.0);
        let b = t.map_rect_bounds(Rect::new(0.0, 0.0, 4.0, 2.0));
        assert_eq!(b, Rect::new(-2.0, 0.0, 2.0, 4.0));
    }
}
