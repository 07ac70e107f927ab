//! Texture memory management.
//!
//! Small images are packed into shared atlas pages, everything else gets a
//! standalone texture. All handles share one LRU list and one byte/item
//! budget; eviction always takes the least recently used handle.

mod budget;
mod cache;
mod handle;
mod page;

pub use budget::Budget;
pub use cache::TextureCache;
pub use handle::{Backing, CacheOwner, HandleId, HandleKind, PageId, TextureHandle};
pub use page::SharedPage;
