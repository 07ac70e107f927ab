//! Texture space allocation for shared atlas pages.

mod packer;

pub use packer::RectPacker;
