//! Coordinate and geometry types shared by the draw target, caches and devices.
//!
//! Canonical space:
//! - Device pixels
//! - Origin top-left
//! - +X right, +Y down
//!
//! Float types (`Vec2`, `Rect`) describe user geometry; integer types
//! (`IntPoint`, `IntSize`, `IntRect`) describe texels, scissors and atlas
//! regions.

mod int_rect;
mod rect;
mod transform;
mod vec2;

pub use int_rect::{IntPoint, IntRect, IntSize};
pub use rect::Rect;
pub use transform::Transform;
pub use vec2::Vec2;
