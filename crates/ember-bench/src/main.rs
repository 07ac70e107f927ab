use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use ember_canvas::coords::{IntRect, IntSize, Rect, Transform, Vec2};
use ember_canvas::geom::{FillRule, Path, PathBuilder};
use ember_canvas::logging::{init_logging, LoggingConfig};
use ember_canvas::paint::{Color, CompositeOp, DrawOptions, LineCap, Pattern, StrokeOptions};
use ember_canvas::text::{FontId, FontSystem};
use ember_canvas::{
    CanvasConfig, ContextSlot, DeviceError, DeviceInit, DrawTarget, GpuDevice, SharedContext, SoftwareDevice,
    SurfaceFormat, WgpuDevice,
};

const SIZE: IntSize = IntSize { width: 512, height: 384 };

/// Drives a draw target through a synthetic frame loop and logs the
/// acceleration counters.
#[derive(Parser, Debug)]
#[command(name = "ember-bench")]
struct Options {
    /// Number of frames to draw.
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Use the CPU reference device instead of wgpu.
    #[arg(long)]
    software: bool,

    /// TrueType/OpenType font for the text overlay.
    #[arg(long, value_name = "FILE")]
    font: Option<PathBuf>,
}

fn create_device(software: bool) -> Result<Box<dyn GpuDevice>, DeviceError> {
    if software {
        return Ok(Box::new(SoftwareDevice::new(8192)));
    }
    WgpuDevice::new_blocking(DeviceInit::default())
        .map(|d| Box::new(d) as Box<dyn GpuDevice>)
        .map_err(|e| DeviceError::Backend(format!("{e:#}")))
}

fn open_context(config: &CanvasConfig, software: bool) -> Result<SharedContext> {
    let mut slot = ContextSlot::new();
    match slot.get_or_create(config, || create_device(software)) {
        Ok(ctx) => Ok(ctx),
        Err(err) if !software => {
            log::warn!("GPU unavailable ({err}), using the software device");
            ContextSlot::new()
                .get_or_create(config, || create_device(true))
                .context("software device")
        }
        Err(err) => Err(err).context("software device"),
    }
}

fn star(points: usize, outer: f32, inner: f32) -> Option<Path> {
    let mut pb = PathBuilder::new();
    for i in 0..points * 2 {
        let r = if i % 2 == 0 { outer } else { inner };
        let a = i as f32 * std::f32::consts::PI / points as f32;
        let p = Vec2::new(r * a.sin(), -r * a.cos());
        if i == 0 { pb.move_to(p) } else { pb.line_to(p) }
    }
    pb.close();
    pb.finish(FillRule::EvenOdd)
}

/// One synthetic frame: cached shapes at moving offsets, hairlines, text,
/// and an occasional op the GPU path cannot blend.
fn draw_frame(target: &mut DrawTarget, frame: u32, star: &Path, text: Option<(&FontSystem, FontId)>) -> Result<()> {
    let t = frame as f32;
    target.set_transform(Transform::identity());
    target.fill_rect(Rect::new(0.0, 0.0, SIZE.width as f32, SIZE.height as f32), &Pattern::Color(Color::white()), &DrawOptions::default());

    for i in 0..24 {
        let x = 24.0 + (i % 8) as f32 * 60.0 + (t * 2.0) % 60.0;
        let y = 40.0 + (i / 8) as f32 * 90.0;
        target.set_transform(Transform::translation(x.round(), y));
        let color = Color::from_rgba8((i * 10) as u8, 80, 200 - (i * 5) as u8, 220);
        target.fill(star, &Pattern::Color(color), &DrawOptions::default());
    }

    target.set_transform(Transform::identity());
    let stroke = StrokeOptions { cap: LineCap::Square, ..StrokeOptions::with_width(1.0) };
    for i in 0..16 {
        let y = 300.0 + i as f32 * 4.0;
        target.stroke_line(Vec2::new(8.0, y), Vec2::new(504.0 - t % 100.0, y), &Pattern::Color(Color::black()), &stroke, &DrawOptions::default());
    }

    if let Some((fonts, id)) = text {
        target.fill_text(fonts, id, 18.0, &format!("frame {frame}"), Vec2::new(16.0, 372.0), &Pattern::Color(Color::black()), &DrawOptions::default())?;
    }

    if frame % 30 == 29 {
        target.fill_rect(Rect::new(200.0, 200.0, 64.0, 64.0), &Pattern::Color(Color::black()), &DrawOptions::with_op(CompositeOp::Xor));
    }
    Ok(())
}

fn log_frame(frame: u32, target: &DrawTarget) {
    let c = target.profile().current();
    log::debug!(
        "frame {frame}: hits={} misses={} uncached={} layers={} fallbacks={} readbacks={}",
        c.cache_hits,
        c.cache_misses,
        c.uncached_draws,
        c.layers,
        c.fallbacks,
        c.readbacks
    );
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());
    let options = Options::parse();
    let config = CanvasConfig::default();

    let ctx = open_context(&config, options.software)?;
    let mut target = DrawTarget::new(&ctx, SIZE, SurfaceFormat::Rgba8).context("draw target")?;

    let mut fonts = FontSystem::new();
    let font = match &options.font {
        Some(path) => {
            let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            Some(fonts.load_font(&bytes).with_context(|| format!("loading {}", path.display()))?)
        }
        None => None,
    };
    let star = star(5, 24.0, 10.0).context("star path")?;

    let start = std::time::Instant::now();
    let mut refreshes = 0;
    for frame in 0..options.frames {
        target.begin_frame(IntRect::default());
        draw_frame(&mut target, frame, &star, font.map(|id| (&fonts, id)))?;
        if frame % 10 == 0 {
            target.snapshot().context("snapshot")?;
        }
        log_frame(frame, &target);
        target.end_frame();

        if target.requires_refresh() {
            log::warn!("frame {frame}: acceleration is not paying off, recreating target");
            refreshes += 1;
            target = DrawTarget::new(&ctx, SIZE, SurfaceFormat::Rgba8).context("draw target")?;
        }
    }

    let elapsed = start.elapsed();
    log::info!(
        "{} frames in {:.1} ms ({:.2} ms/frame), {} refreshes, {} failed frames",
        options.frames,
        elapsed.as_secs_f64() * 1e3,
        elapsed.as_secs_f64() * 1e3 / options.frames.max(1) as f64,
        refreshes,
        target.profile().failed_frames()
    );
    log::info!("texture memory: {} bytes", ctx.borrow().textures().budget().used_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── arguments ─────────────────────────────────────────────────────────

    #[test]
    fn defaults_without_arguments() {
        let o = Options::try_parse_from(["ember-bench"]).unwrap();
        assert_eq!(o.frames, 120);
        assert!(!o.software);
        assert!(o.font.is_none());
    }

    #[test]
    fn flags_are_parsed() {
        let o = Options::try_parse_from(["ember-bench", "--software", "--frames", "7", "--font", "a.ttf"]).unwrap();
        assert_eq!(o.frames, 7);
        assert!(o.software);
        assert_eq!(o.font, Some(PathBuf::from("a.ttf")));
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(Options::try_parse_from(["ember-bench", "--frames", "many"]).is_err());
        assert!(Options::try_parse_from(["ember-bench", "--fast"]).is_err());
    }
}
