use crate::geom::PathVertex;

/// Tuning knobs for a [`GpuContext`](crate::context::GpuContext) and the
/// draw targets created on it.
///
/// Defaults suit a desktop-class GPU. Keep changes to these values local to
/// the embedder; the context reads them once at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasConfig {
    /// Byte budget for all cached textures (shared pages and standalone).
    pub max_cache_bytes: usize,

    /// Handle count budget. Bounds bookkeeping for many tiny allocations
    /// that stay under the byte limit.
    pub max_cache_items: usize,

    /// Bytes of emptied shared pages kept alive for reuse.
    pub reserve_empty_bytes: usize,

    /// Edge length of shared atlas pages, capped by the device limit.
    pub shared_page_size: i32,

    /// Largest surface (or pattern) the GPU path will upload, capped by the
    /// device limit.
    pub max_surface_size: i32,

    /// Path vertex buffer size, in vertices. Zero disables span drawing.
    pub path_vertex_capacity: usize,

    /// Paths with more verbs than this are rasterized instead of tessellated.
    pub path_max_complexity: usize,

    /// Entries without a handle or vertex range are purged past this count.
    pub max_cache_entries: usize,

    /// Frames per usage-profile window.
    pub profile_frames: u32,

    /// Refresh when fallbacks exceed this fraction of frames in a window.
    pub profile_fallback_ratio: f32,

    /// Refresh when cache misses exceed this fraction of cache lookups.
    pub profile_cache_miss_ratio: f32,

    /// Targets smaller than this on both axes are better served by the CPU.
    pub min_size: i32,

    /// Targets larger than this on either axis are refused (0 = unlimited).
    pub max_size: i32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: 256 << 20,
            max_cache_items: 2048,
            reserve_empty_bytes: 36 << 20,
            shared_page_size: 2048,
            max_surface_size: 5120,
            path_vertex_capacity: (1 << 20) / std::mem::size_of::<PathVertex>(),
            path_max_complexity: 4000,
            max_cache_entries: 4096,
            profile_frames: 10,
            profile_fallback_ratio: 0.3,
            profile_cache_miss_ratio: 0.66,
            min_size: 128,
            max_size: 0,
        }
    }
}
