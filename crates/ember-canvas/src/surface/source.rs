use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::coords::IntSize;
use crate::device::SurfaceFormat;
use crate::error::{CanvasError, CanvasResult};
use crate::texture::HandleId;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

struct SourceData {
    id: u64,
    size: IntSize,
    format: SurfaceFormat,
    /// Tightly packed rows; premultiplied RGBA or 8-bit alpha.
    data: Vec<u8>,
    /// Texture copy of `data`, if one is cached.
    texture: Cell<Option<HandleId>>,
}

/// Immutable image usable as a pattern, mask or copy source.
///
/// Clones share pixels. A surface remembers the cached texture holding its
/// pixels so repeated draws upload once; eviction clears that link.
#[derive(Clone)]
pub struct SourceSurface(Rc<SourceData>);

impl fmt::Debug for SourceSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSurface")
            .field("id", &self.0.id)
            .field("size", &self.0.size)
            .field("format", &self.0.format)
            .finish()
    }
}

impl SourceSurface {
    /// Wraps tightly packed pixels. Color formats are premultiplied RGBA.
    pub fn from_pixels(size: IntSize, format: SurfaceFormat, data: Vec<u8>) -> CanvasResult<Self> {
        if size.is_empty() {
            return Err(CanvasError::EmptySurface);
        }
        let needed = size.area() * format.bytes_per_pixel();
        if data.len() < needed {
            return Err(CanvasError::BufferTooSmall { needed, actual: data.len() });
        }
        Ok(Self::new_unchecked(size, format, data))
    }

    fn new_unchecked(size: IntSize, format: SurfaceFormat, mut data: Vec<u8>) -> Self {
        data.truncate(size.area() * format.bytes_per_pixel());
        Self(Rc::new(SourceData {
            id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
            size,
            format,
            data,
            texture: Cell::new(None),
        }))
    }

    pub(crate) fn from_pixmap(pixmap: tiny_skia::Pixmap, format: SurfaceFormat) -> Self {
        let size = IntSize::new(pixmap.width() as i32, pixmap.height() as i32);
        Self::new_unchecked(size, format, pixmap.take())
    }

    /// Unique per surface; clones share it.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    #[inline]
    pub fn size(&self) -> IntSize {
        self.0.size
    }

    #[inline]
    pub fn format(&self) -> SurfaceFormat {
        self.0.format
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.0.data
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.0.size.width as usize * self.0.format.bytes_per_pixel()
    }

    /// Premultiplied RGBA of one pixel; alpha surfaces report `[0, 0, 0, a]`.
    pub fn pixel(&self, x: i32, y: i32) -> Option<[u8; 4]> {
        if x < 0 || y < 0 || x >= self.0.size.width || y >= self.0.size.height {
            return None;
        }
        let bpp = self.0.format.bytes_per_pixel();
        let o = (y as usize * self.0.size.width as usize + x as usize) * bpp;
        Some(match self.0.format {
            SurfaceFormat::A8 => [0, 0, 0, self.0.data[o]],
            _ => [self.0.data[o], self.0.data[o + 1], self.0.data[o + 2], self.0.data[o + 3]],
        })
    }

    /// RGBA copy for the CPU rasterizer.
    pub(crate) fn to_pixmap(&self) -> Option<tiny_skia::Pixmap> {
        let size = tiny_skia::IntSize::from_wh(self.0.size.width as u32, self.0.size.height as u32)?;
        let data = match self.0.format {
            SurfaceFormat::A8 => self.0.data.iter().flat_map(|&a| [0, 0, 0, a]).collect(),
            _ => self.0.data.clone(),
        };
        tiny_skia::Pixmap::from_vec(data, size)
    }

    pub(crate) fn texture(&self) -> Option<HandleId> {
        self.0.texture.get()
    }

    pub(crate) fn set_texture(&self, handle: Option<HandleId>) {
        self.0.texture.set(handle);
    }

    pub(crate) fn downgrade(&self) -> SurfaceLink {
        SurfaceLink(Rc::downgrade(&self.0))
    }
}

/// Weak link from a texture handle back to the surface it caches.
#[derive(Debug, Clone)]
pub struct SurfaceLink(Weak<SourceData>);

impl SurfaceLink {
    pub fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Forgets `handle` on the surface if it is still the cached one.
    pub(crate) fn detach(&self, handle: HandleId) {
        if let Some(data) = self.0.upgrade() {
            if data.texture.get() == Some(handle) {
                data.texture.set(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> HandleId {
        HandleId { index: 0, generation: 0 }
    }

    #[test]
    fn rejects_empty_and_short_buffers() {
        assert!(matches!(
            SourceSurface::from_pixels(IntSize::new(0, 4), SurfaceFormat::Rgba8, vec![]),
            Err(CanvasError::EmptySurface)
        ));
        assert!(matches!(
            SourceSurface::from_pixels(IntSize::new(2, 2), SurfaceFormat::Rgba8, vec![0; 15]),
            Err(CanvasError::BufferTooSmall { needed: 16, actual: 15 })
        ));
    }

    #[test]
    fn clones_share_identity_and_texture() {
        let s = SourceSurface::from_pixels(IntSize::new(1, 1), SurfaceFormat::A8, vec![9]).unwrap();
        let c = s.clone();
        assert_eq!(s.id(), c.id());
        s.set_texture(Some(handle()));
        assert_eq!(c.texture(), Some(handle()));
        let other = SourceSurface::from_pixels(IntSize::new(1, 1), SurfaceFormat::A8, vec![9]).unwrap();
        assert_ne!(other.id(), s.id());
    }

    #[test]
    fn link_detaches_only_its_handle() {
        let s = SourceSurface::from_pixels(IntSize::new(1, 1), SurfaceFormat::Rgba8, vec![1, 2, 3, 4]).unwrap();
        let link = s.downgrade();
        s.set_texture(Some(handle()));
        link.detach(HandleId { index: 5, generation: 0 });
        assert_eq!(s.texture(), Some(handle()));
        link.detach(handle());
        assert_eq!(s.texture(), None);
        assert!(link.is_live());
        drop(s);
        assert!(!link.is_live());
    }

    #[test]
    fn alpha_surface_expands_to_black() {
        let s = SourceSurface::from_pixels(IntSize::new(2, 1), SurfaceFormat::A8, vec![10, 200]).unwrap();
        let p = s.to_pixmap().unwrap();
        assert_eq!(p.data(), &[0, 0, 0, 10, 0, 0, 0, 200]);
        assert_eq!(s.pixel(1, 0), Some([0, 0, 0, 200]));
        assert_eq!(s.pixel(2, 0), None);
    }
}
