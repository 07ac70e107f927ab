//! GPU-accelerated 2D canvas.
//!
//! Draw calls land on a [`DrawTarget`], which tries the shared
//! [`GpuContext`] first and falls back to a CPU raster surface for anything
//! the GPU path cannot express. Both copies are kept consistent lazily, so
//! callers only ever see one image.
//!
//! The GPU side caches uploaded surfaces, rasterized paths and glyph runs in
//! shared atlas pages under a memory budget.

pub mod atlas;
pub mod cache;
pub mod config;
pub mod context;
pub mod coords;
pub mod device;
pub mod error;
pub mod geom;
pub mod logging;
pub mod paint;
pub mod profile;
pub mod surface;
pub mod target;
pub mod text;
pub mod texture;

pub use config::CanvasConfig;
pub use context::{ContextSlot, GpuContext, SharedContext};
pub use device::{DeviceError, DeviceInit, GpuDevice, SoftwareDevice, SurfaceFormat, WgpuDevice};
pub use error::{CanvasError, CanvasResult};
pub use target::DrawTarget;
