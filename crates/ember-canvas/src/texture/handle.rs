use crate::cache::EntryId;
use crate::coords::{IntPoint, IntRect, IntSize};
use crate::device::{SurfaceFormat, TextureId};
use crate::surface::SurfaceLink;

/// Generational index of a [`TextureHandle`] in the texture cache arena.
///
/// Ids of evicted handles go stale: lookups through them resolve to nothing.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct HandleId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Index of a shared page in the texture cache.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PageId(pub(crate) u32);

/// Content cache entry that owns a handle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CacheOwner {
    Path(EntryId),
    Glyph(EntryId),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HandleKind {
    /// A region of a shared atlas page.
    Shared { page: PageId, bounds: IntRect },
    /// A dedicated texture sized to its content.
    Standalone { texture: TextureId, size: IntSize },
}

/// Texture memory holding one cached image.
#[derive(Debug)]
pub struct TextureHandle {
    pub(crate) kind: HandleKind,
    pub(crate) format: SurfaceFormat,
    pub(crate) used_bytes: usize,
    pub(crate) valid: bool,
    pub(crate) owner: Option<CacheOwner>,
    pub(crate) surface: Option<SurfaceLink>,
    pub(crate) sampling_offset: IntPoint,
}

impl TextureHandle {
    pub(crate) fn new(kind: HandleKind, format: SurfaceFormat) -> Self {
        let size = match kind {
            HandleKind::Shared { bounds, .. } => bounds.size(),
            HandleKind::Standalone { size, .. } => size,
        };
        Self {
            kind,
            format,
            used_bytes: size.area() * format.bytes_per_pixel(),
            valid: true,
            owner: None,
            surface: None,
            sampling_offset: IntPoint::default(),
        }
    }

    #[inline]
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Region of the backing texture holding this handle's pixels.
    pub fn bounds(&self) -> IntRect {
        match self.kind {
            HandleKind::Shared { bounds, .. } => bounds,
            HandleKind::Standalone { size, .. } => IntRect::from_size(size),
        }
    }

    #[inline]
    pub fn size(&self) -> IntSize {
        self.bounds().size()
    }

    #[inline]
    pub fn format(&self) -> SurfaceFormat {
        self.format
    }

    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    #[inline]
    pub fn owner(&self) -> Option<CacheOwner> {
        self.owner
    }

    /// Offset of the uploaded pixels inside the source they were taken from.
    #[inline]
    pub fn sampling_offset(&self) -> IntPoint {
        self.sampling_offset
    }

    /// True when neither a cache entry nor a live surface points here.
    pub fn is_unreferenced(&self) -> bool {
        self.owner.is_none() && !self.surface.as_ref().is_some_and(SurfaceLink::is_live)
    }
}

/// Where a handle's pixels live on the device.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Backing {
    pub texture: TextureId,
    /// Region inside `texture`.
    pub bounds: IntRect,
    /// Full size of `texture`.
    pub texture_size: IntSize,
    pub format: SurfaceFormat,
}
