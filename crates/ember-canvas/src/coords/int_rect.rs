use core::ops::{Add, Sub};

/// Integer texel position.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct IntPoint {
    pub x: i32,
    pub y: i32,
}

impl IntPoint {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Add for IntPoint {
    type Output = IntPoint;
    #[inline]
    fn add(self, rhs: IntPoint) -> IntPoint {
        IntPoint::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for IntPoint {
    type Output = IntPoint;
    #[inline]
    fn sub(self, rhs: IntPoint) -> IntPoint {
        IntPoint::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Integer extent in texels.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct IntSize {
    pub width: i32,
    pub height: i32,
}

impl IntSize {
    #[inline]
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Area in texels; zero for empty sizes.
    #[inline]
    pub fn area(self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width as usize * self.height as usize
        }
    }

    #[inline]
    pub fn max_dim(self) -> i32 {
        self.width.max(self.height)
    }

    #[inline]
    pub fn min_dim(self) -> i32 {
        self.width.min(self.height)
    }
}

/// Integer rectangle: atlas regions, scissors and clip bounds.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct IntRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl IntRect {
    #[inline]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    #[inline]
    pub const fn from_origin_size(origin: IntPoint, size: IntSize) -> Self {
        Self::new(origin.x, origin.y, size.width, size.height)
    }

    #[inline]
    pub const fn from_size(size: IntSize) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    #[inline]
    pub fn from_ltrb(l: i32, t: i32, r: i32, b: i32) -> Self {
        Self::new(l, t, r - l, b - t)
    }

    /// Right edge (exclusive).
    #[inline]
    pub fn xmost(self) -> i32 {
        self.x + self.width
    }

    /// Bottom edge (exclusive).
    #[inline]
    pub fn ymost(self) -> i32 {
        self.y + self.height
    }

    #[inline]
    pub fn origin(self) -> IntPoint {
        IntPoint::new(self.x, self.y)
    }

    #[inline]
    pub fn size(self) -> IntSize {
        IntSize::new(self.width, self.height)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    #[inline]
    pub fn area(self) -> usize {
        self.size().area()
    }

    /// True when `other` lies entirely inside `self`.
    #[inline]
    pub fn contains(self, other: IntRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.xmost() <= self.xmost()
            && other.ymost() <= self.ymost()
    }

    /// Overlap of two rects; empty (zero-sized) when they do not intersect.
    pub fn intersect(self, other: IntRect) -> IntRect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.xmost().min(other.xmost());
        let y1 = self.ymost().min(other.ymost());
        if x1 <= x0 || y1 <= y0 {
            IntRect::default()
        } else {
            IntRect::from_ltrb(x0, y0, x1, y1)
        }
    }

    #[inline]
    pub fn intersects(self, other: IntRect) -> bool {
        !self.intersect(other).is_empty()
    }

    #[inline]
    pub fn translate(self, d: IntPoint) -> IntRect {
        IntRect::new(self.x + d.x, self.y + d.y, self.width, self.height)
    }

    #[inline]
    pub fn inflate(self, d: i32) -> IntRect {
        IntRect::new(self.x - d, self.y - d, self.width + 2 * d, self.height + 2 * d)
    }

    pub fn to_skia(self) -> Option<tiny_skia::IntRect> {
        tiny_skia::IntRect::from_xywh(self.x, self.y, self.width.max(0) as u32, self.height.max(0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_disjoint_is_empty() {
        let a = IntRect::new(0, 0, 4, 4);
        let b = IntRect::new(4, 0, 4, 4);
        assert!(a.intersect(b).is_empty());
        assert!(!a.intersects(b));
    }

    #[test]
    fn intersect_overlap() {
        let a = IntRect::new(0, 0, 10, 10);
        let b = IntRect::new(5, -5, 10, 10);
        assert_eq!(a.intersect(b), IntRect::new(5, 0, 5, 5));
    }

    #[test]
    fn contains_is_inclusive_of_edges() {
        let a = IntRect::new(0, 0, 64, 64);
        assert!(a.contains(a));
        assert!(a.contains(IntRect::new(63, 63, 1, 1)));
        assert!(!a.contains(IntRect::new(63, 63, 2, 1)));
    }

    #[test]
    fn area_of_empty_size_is_zero() {
        assert_eq!(IntSize::new(-3, 5).area(), 0);
        assert_eq!(IntSize::new(3, 5).area(), 15);
    }
}
