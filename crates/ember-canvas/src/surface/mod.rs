//! Pixel storage: immutable source images and the CPU raster target.

mod cpu;
mod source;

pub use cpu::CpuSurface;
pub use source::{SourceSurface, SurfaceLink};
