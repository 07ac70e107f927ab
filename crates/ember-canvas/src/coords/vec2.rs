use core::ops::{Add, Sub};

use super::IntPoint;

/// Point or offset in device pixels.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub const fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    #[inline]
    pub fn floor(self) -> Self {
        Self::new(self.x.floor(), self.y.floor())
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.x.hypot(self.y)
    }

    /// Rounds to the nearest `1 / steps` of a pixel.
    #[inline]
    pub fn snap(self, steps: f32) -> Self {
        Self::new((self.x * steps).round() / steps, (self.y * steps).round() / steps)
    }

    /// Nearest point on a grid with `scale` cells per pixel on each axis,
    /// in grid units.
    #[inline]
    pub fn to_grid(self, scale: IntPoint) -> IntPoint {
        IntPoint::new(
            (self.x * scale.x as f32).round() as i32,
            (self.y * scale.y as f32).round() as i32,
        )
    }

    /// Inverse of [`Vec2::to_grid`].
    #[inline]
    pub fn from_grid(p: IntPoint, scale: IntPoint) -> Self {
        Self::new(p.x as f32 / scale.x as f32, p.y as f32 / scale.y as f32)
    }

    #[inline]
    pub fn to_skia(self) -> tiny_skia::Point {
        tiny_skia::Point::from_xy(self.x, self.y)
    }
}

impl From<tiny_skia::Point> for Vec2 {
    #[inline]
    fn from(p: tiny_skia::Point) -> Self {
        Self::new(p.x, p.y)
    }
}

impl From<IntPoint> for Vec2 {
    #[inline]
    fn from(p: IntPoint) -> Self {
        Self::new(p.x as f32, p.y as f32)
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    #[inline]
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    #[inline]
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}
