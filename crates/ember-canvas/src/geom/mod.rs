//! Path geometry services: construction, quantization for cache keys and
//! coverage-span tessellation for the GPU vertex buffer.

mod path;
mod quantize;
mod tessellate;

pub use path::{FillRule, Path, PathBuilder};
pub use quantize::{QuantizedPath, QUANT_SCALE};
pub use tessellate::{coverage_mask, tessellate_spans, PathVertex};
