//! Per-target usage profiling.
//!
//! A draw target counts how often the accelerated path had to give up
//! during a frame. Over a window of frames those counts decide whether the
//! embedder would be better served by a plain CPU canvas.

use crate::config::CanvasConfig;

/// Counters for one frame. Reset by [`UsageProfile::begin_frame`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct FrameCounters {
    /// Draws that went to the CPU surface.
    pub fallbacks: u32,
    /// CPU overlays started on top of GPU content.
    pub layers: u32,
    pub cache_misses: u32,
    pub cache_hits: u32,
    /// GPU draws that needed no cache at all.
    pub uncached_draws: u32,
    /// Framebuffer reads and waits on outstanding uploads.
    pub readbacks: u32,
}

impl FrameCounters {
    /// A frame fails when anything fell back, or when misses, readbacks and
    /// layers make up more than `miss_ratio` of all requests.
    fn failed(&self, miss_ratio: f32) -> bool {
        let costly = self.cache_misses + self.readbacks + self.layers;
        let requests = costly + self.cache_hits + self.uncached_draws;
        self.fallbacks > 0 || costly as f32 > miss_ratio * requests as f32
    }
}

/// Frame statistics of one draw target.
#[derive(Debug, Clone)]
pub struct UsageProfile {
    current: FrameCounters,
    frame_count: u32,
    failed_frames: u32,
    window: u32,
    fallback_ratio: f32,
    cache_miss_ratio: f32,
}

impl UsageProfile {
    pub fn new(config: &CanvasConfig) -> Self {
        Self {
            current: FrameCounters::default(),
            frame_count: 0,
            failed_frames: 0,
            window: config.profile_frames,
            fallback_ratio: config.profile_fallback_ratio,
            cache_miss_ratio: config.profile_cache_miss_ratio,
        }
    }

    #[inline]
    pub fn current(&self) -> &FrameCounters {
        &self.current
    }

    #[inline]
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    #[inline]
    pub fn failed_frames(&self) -> u32 {
        self.failed_frames
    }

    pub fn on_fallback(&mut self) {
        self.current.fallbacks += 1;
    }

    pub fn on_layer(&mut self) {
        self.current.layers += 1;
    }

    pub fn on_cache_miss(&mut self) {
        self.current.cache_misses += 1;
    }

    pub fn on_cache_hit(&mut self) {
        self.current.cache_hits += 1;
    }

    pub fn on_uncached_draw(&mut self) {
        self.current.uncached_draws += 1;
    }

    pub fn on_readback(&mut self) {
        self.current.readbacks += 1;
    }

    pub fn begin_frame(&mut self) {
        self.current = FrameCounters::default();
    }

    pub fn end_frame(&mut self) {
        if self.current.failed(self.cache_miss_ratio) {
            self.failed_frames += 1;
        }
        self.frame_count += 1;
    }

    /// True once a full window of frames has been seen and too many of them
    /// failed. A zero-frame window disables the check.
    pub fn requires_refresh(&self) -> bool {
        if self.window == 0 || self.frame_count < self.window {
            return false;
        }
        self.failed_frames as f32 > self.fallback_ratio * self.frame_count as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UsageProfile {
        UsageProfile::new(&CanvasConfig { profile_frames: 4, ..CanvasConfig::default() })
    }

    fn run_frame(p: &mut UsageProfile, f: impl FnOnce(&mut UsageProfile)) {
        p.begin_frame();
        f(p);
        p.end_frame();
    }

    // ── frame classification ─────────────────────────────────────────────

    #[test]
    fn any_fallback_fails_the_frame() {
        let mut p = profile();
        run_frame(&mut p, |p| {
            for _ in 0..100 {
                p.on_cache_hit();
            }
            p.on_fallback();
        });
        assert_eq!(p.failed_frames(), 1);
    }

    #[test]
    fn mostly_misses_fail_the_frame() {
        let mut p = profile();
        run_frame(&mut p, |p| {
            p.on_cache_miss();
            p.on_cache_miss();
            p.on_cache_miss();
            p.on_cache_hit();
        });
        assert_eq!(p.failed_frames(), 1);

        run_frame(&mut p, |p| {
            p.on_cache_miss();
            p.on_cache_hit();
            p.on_uncached_draw();
        });
        assert_eq!(p.failed_frames(), 1, "1/3 misses is under the ratio");
    }

    #[test]
    fn empty_frame_passes() {
        let mut p = profile();
        run_frame(&mut p, |_| {});
        assert_eq!(p.failed_frames(), 0);
        assert_eq!(p.frame_count(), 1);
    }

    #[test]
    fn begin_frame_resets_counters() {
        let mut p = profile();
        p.on_layer();
        p.on_readback();
        p.begin_frame();
        assert_eq!(*p.current(), FrameCounters::default());
    }

    // ── refresh policy ────────────────────────────────────────────────────

    #[test]
    fn refresh_waits_for_a_full_window() {
        let mut p = profile();
        for _ in 0..3 {
            run_frame(&mut p, UsageProfile::on_fallback);
        }
        assert!(!p.requires_refresh());
        run_frame(&mut p, UsageProfile::on_fallback);
        assert!(p.requires_refresh());
    }

    #[test]
    fn occasional_failures_do_not_refresh() {
        let mut p = profile();
        run_frame(&mut p, UsageProfile::on_fallback);
        for _ in 0..3 {
            run_frame(&mut p, UsageProfile::on_cache_hit);
        }
        // 1 of 4 frames failed; the default ratio is 0.3.
        assert!(!p.requires_refresh());
    }

    #[test]
    fn zero_window_never_refreshes() {
        let mut p = UsageProfile::new(&CanvasConfig { profile_frames: 0, ..CanvasConfig::default() });
        for _ in 0..20 {
            run_frame(&mut p, UsageProfile::on_fallback);
        }
        assert!(!p.requires_refresh());
    }
}
