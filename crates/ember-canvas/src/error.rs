use crate::coords::IntSize;
use crate::device::{DeviceError, SurfaceFormat};
use crate::text::FontLoadError;

/// Errors surfaced by the canvas API.
///
/// Resource exhaustion and unsupported GPU features are never reported here:
/// those draws fall back to the CPU surface.
#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    #[error("surface size {0:?} is outside the accelerated range")]
    UnsupportedSize(IntSize),

    #[error("{0:?} surfaces cannot be drawn into")]
    UnsupportedFormat(SurfaceFormat),

    #[error("zero-sized surface")]
    EmptySurface,

    #[error("pixel buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("GPU context initialization failed earlier; not retrying")]
    InitPreviouslyFailed,

    #[error("GPU context initialization failed: {0}")]
    Init(#[source] DeviceError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("pixels are not CPU-resident")]
    PixelsUnavailable,

    #[error(transparent)]
    Font(#[from] FontLoadError),

    #[error("unknown font {0:?}")]
    UnknownFont(crate::text::FontId),
}

pub type CanvasResult<T> = Result<T, CanvasError>;
