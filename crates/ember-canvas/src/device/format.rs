/// Pixel layout of surfaces and device textures.
///
/// Color formats are premultiplied RGBA in memory; `Rgbx8` ignores alpha.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SurfaceFormat {
    Rgba8,
    Rgbx8,
    A8,
}

impl SurfaceFormat {
    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            SurfaceFormat::Rgba8 | SurfaceFormat::Rgbx8 => 4,
            SurfaceFormat::A8 => 1,
        }
    }

    #[inline]
    pub fn is_opaque(self) -> bool {
        self == SurfaceFormat::Rgbx8
    }

    #[inline]
    pub fn is_alpha_only(self) -> bool {
        self == SurfaceFormat::A8
    }

    /// Format of the device texture that stores this surface format.
    /// `Rgbx8` shares storage with `Rgba8`.
    #[inline]
    pub fn storage(self) -> SurfaceFormat {
        match self {
            SurfaceFormat::Rgbx8 => SurfaceFormat::Rgba8,
            f => f,
        }
    }
}

/// Opaque device texture name.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u32);
