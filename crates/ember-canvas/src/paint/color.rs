/// Premultiplied RGBA color.
///
/// Invariant:
/// - `rgb` components are multiplied by `a`.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Color {
    pub r: f32, // premultiplied
    pub g: f32, // premultiplied
    pub b: f32, // premultiplied
    pub a: f32,
}

impl Color {
    #[inline]
    pub const fn transparent() -> Self {
        Self { r: 0.0, g: 0.0, b: 0.0, a: 0.0 }
    }

    #[inline]
    pub const fn black() -> Self {
        Self { r: 0.0, g: 0.0, b: 0.0, a: 1.0 }
    }

    #[inline]
    pub const fn white() -> Self {
        Self { r: 1.0, g: 1.0, b: 1.0, a: 1.0 }
    }

    /// Creates a premultiplied color from straight bytes (`0`–`255`).
    #[inline]
    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::from_straight(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, a as f32 / 255.0)
    }

    /// Creates a premultiplied color from premultiplied components.
    #[inline]
    pub const fn from_premul(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Creates a premultiplied color from straight alpha components.
    #[inline]
    pub fn from_straight(r: f32, g: f32, b: f32, a: f32) -> Self {
        let a = a.clamp(0.0, 1.0);
        Self {
            r: (r.clamp(0.0, 1.0)) * a,
            g: (g.clamp(0.0, 1.0)) * a,
            b: (b.clamp(0.0, 1.0)) * a,
            a,
        }
    }

    /// Returns a straight-alpha representation.
    ///
    /// For `a == 0`, RGB is returned as 0.
    #[inline]
    pub fn to_straight(self) -> (f32, f32, f32, f32) {
        if self.a <= 0.0 {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let inv = 1.0 / self.a;
            (self.r * inv, self.g * inv, self.b * inv, self.a)
        }
    }

    /// Scales every channel, which for premultiplied colors is an opacity change.
    #[inline]
    pub fn scale_alpha(self, alpha: f32) -> Self {
        let k = alpha.clamp(0.0, 1.0);
        Self { r: self.r * k, g: self.g * k, b: self.b * k, a: self.a * k }
    }

    #[inline]
    pub fn is_opaque(self) -> bool {
        self.a >= 1.0
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite() && self.a.is_finite()
    }

    /// Clamps all channels to [0, 1] and enforces premultiplication.
    #[inline]
    pub fn clamped(self) -> Self {
        let a = self.a.clamp(0.0, 1.0);
        let r = self.r.clamp(0.0, a);
        let g = self.g.clamp(0.0, a);
        let b = self.b.clamp(0.0, a);
        Self { r, g, b, a }
    }

    /// Premultiplied RGBA bytes, the in-memory layout of `Rgba8` surfaces.
    pub fn to_premul_rgba8(self) -> [u8; 4] {
        let c = self.clamped();
        let q = |v: f32| (v * 255.0 + 0.5) as u8;
        [q(c.r), q(c.g), q(c.b), q(c.a)]
    }

    pub fn from_premul_rgba8(px: [u8; 4]) -> Self {
        let f = |v: u8| v as f32 / 255.0;
        Self::from_premul(f(px[0]), f(px[1]), f(px[2]), f(px[3]))
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Straight-alpha `tiny_skia` color.
    pub fn to_skia(self) -> tiny_skia::Color {
        let (r, g, b, a) = self.clamped().to_straight();
        tiny_skia::Color::from_rgba(r, g, b, a).unwrap_or(tiny_skia::Color::TRANSPARENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_roundtrip_through_premul() {
        let c = Color::from_straight(1.0, 0.5, 0.0, 0.5);
        assert_eq!(c.r, 0.5);
        assert_eq!(c.g, 0.25);
        let (r, g, _, a) = c.to_straight();
        assert!((r - 1.0).abs() < 1e-6 && (g - 0.5).abs() < 1e-6 && a == 0.5);
    }

    #[test]
    fn premul_bytes_of_half_red() {
        let c = Color::from_rgba8(255, 0, 0, 128);
        assert_eq!(c.to_premul_rgba8(), [128, 0, 0, 128]);
    }

    #[test]
    fn scale_alpha_scales_all_channels() {
        let c = Color::white().scale_alpha(0.25);
        assert_eq!(c, Color::from_premul(0.25, 0.25, 0.25, 0.25));
    }
}
