use crate::atlas::RectPacker;
use crate::coords::{IntRect, IntSize};
use crate::device::{SurfaceFormat, TextureId};

/// One atlas texture subdivided among many small handles.
#[derive(Debug)]
pub struct SharedPage {
    pub(crate) texture: TextureId,
    pub(crate) format: SurfaceFormat,
    packer: RectPacker,
    handle_count: usize,
}

impl SharedPage {
    pub(crate) fn new(texture: TextureId, size: i32, format: SurfaceFormat) -> Self {
        Self {
            texture,
            format,
            packer: RectPacker::new(IntSize::new(size, size)),
            handle_count: 0,
        }
    }

    #[inline]
    pub fn size(&self) -> IntSize {
        self.packer.bounds().size()
    }

    pub fn bytes(&self) -> usize {
        self.size().area() * self.format.bytes_per_pixel()
    }

    #[inline]
    pub fn handle_count(&self) -> usize {
        self.handle_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handle_count == 0
    }

    pub(crate) fn allocate(&mut self, size: IntSize) -> Option<IntRect> {
        let origin = self.packer.insert(size)?;
        self.handle_count += 1;
        Some(IntRect::from_origin_size(origin, size))
    }

    /// Returns the region to the packer. False if it was not allocated.
    pub(crate) fn free(&mut self, bounds: IntRect) -> bool {
        if !self.packer.remove(bounds) {
            return false;
        }
        self.handle_count -= 1;
        true
    }

    pub fn free_area(&self) -> usize {
        self.packer.free_area()
    }
}
