use crate::coords::{IntPoint, IntRect, Rect, Transform};
use crate::paint::{Color, CompositeOp};

use super::TextureId;

/// Fixed-function blend states available on the GPU.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BlendMode {
    Over,
    Add,
    Atop,
    /// Replaces the destination; coverage scales the source.
    Source,
}

impl BlendMode {
    pub fn from_op(op: CompositeOp) -> Option<Self> {
        match op {
            CompositeOp::Over => Some(BlendMode::Over),
            CompositeOp::Add => Some(BlendMode::Add),
            CompositeOp::Atop => Some(BlendMode::Atop),
            CompositeOp::Source => Some(BlendMode::Source),
            _ => None,
        }
    }
}

/// Slice of the path vertex buffer, in vertices.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct VertexRange {
    pub offset: u32,
    pub count: u32,
}

impl VertexRange {
    #[inline]
    pub fn end(self) -> u32 {
        self.offset + self.count
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Geometry {
    /// `rect` in local space, mapped to device pixels by `transform`.
    Quad { rect: Rect, transform: Transform },
    /// Coverage triangles from the path vertex buffer, translated by
    /// `offset` device pixels.
    Triangles { range: VertexRange, offset: IntPoint },
}

/// Texture read for a textured draw.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TextureSampling {
    pub texture: TextureId,
    /// Device pixel → texel coordinates.
    pub uv_transform: Transform,
    /// Texel region samples are clamped to (the handle's bounds in its page).
    pub bounds: IntRect,
    /// Premultiplied modulation. RGBA texels are multiplied componentwise;
    /// with `alpha_mask` the texel's single channel scales this color.
    pub color: Color,
    pub alpha_mask: bool,
    pub nearest: bool,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Shading {
    Solid(Color),
    Texture(TextureSampling),
}

/// One draw into a framebuffer texture.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DrawCommand {
    pub target: TextureId,
    pub scissor: Option<IntRect>,
    pub blend: BlendMode,
    pub geometry: Geometry,
    pub shading: Shading,
    /// Edge antialiasing for quads. Backends without it draw aliased.
    pub aa: bool,
}
