//! GPU device abstraction.
//!
//! This module is responsible for:
//! - the `GpuDevice` seam the draw target and caches program against
//! - the draw command model (quads or vertex ranges, solid or textured)
//! - two implementations: headless wgpu and a CPU reference device

mod command;
mod error;
mod format;
mod gpu;
mod init;
mod software;

pub use command::{BlendMode, DrawCommand, Geometry, Shading, TextureSampling, VertexRange};
pub use error::DeviceError;
pub use format::{SurfaceFormat, TextureId};
pub use gpu::WgpuDevice;
pub use init::DeviceInit;
pub use software::{SoftwareDevice, SoftwareStats};

use crate::coords::{IntPoint, IntRect, IntSize};
use crate::geom::PathVertex;
use crate::paint::Color;

/// Static device capabilities, queried once at context creation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCaps {
    pub max_texture_size: i32,
    pub vendor: String,
    pub backend: String,
}

/// Operations the accelerated canvas needs from a GPU.
///
/// Command submission may be asynchronous. `read_pixels` and `finish` are
/// the only synchronization points.
pub trait GpuDevice {
    fn caps(&self) -> &DeviceCaps;

    /// True once the device has been lost; every later call fails.
    fn is_lost(&self) -> bool;

    fn create_texture(&mut self, size: IntSize, format: SurfaceFormat) -> Result<TextureId, DeviceError>;

    /// Deleting an unknown texture is a no-op.
    fn delete_texture(&mut self, texture: TextureId);

    /// Writes `size` texels at `origin`. `None` zero-fills the region.
    /// `stride` is the byte distance between rows of `data`.
    fn upload(
        &mut self,
        texture: TextureId,
        origin: IntPoint,
        size: IntSize,
        data: Option<&[u8]>,
        stride: usize,
    ) -> Result<(), DeviceError>;

    /// Scissored clear of `rect` to a premultiplied color.
    fn clear(&mut self, target: TextureId, rect: IntRect, color: Color) -> Result<(), DeviceError>;

    fn draw(&mut self, cmd: &DrawCommand) -> Result<(), DeviceError>;

    /// Replaces (orphans) the path vertex buffer with an empty one.
    fn reset_vertex_buffer(&mut self, capacity: usize) -> Result<(), DeviceError>;

    /// Writes vertices at `offset` (in vertices) into the current buffer.
    fn write_vertices(&mut self, offset: usize, vertices: &[PathVertex]) -> Result<(), DeviceError>;

    /// Copies `rect` of `texture` into `dst`, rows `stride` bytes apart.
    fn read_pixels(&mut self, texture: TextureId, rect: IntRect, dst: &mut [u8], stride: usize) -> Result<(), DeviceError>;

    /// Blocks until all submitted work has completed.
    fn finish(&mut self);
}
