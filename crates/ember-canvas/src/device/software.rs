use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;

use crate::coords::{IntPoint, IntRect, IntSize, Vec2};
use crate::geom::PathVertex;
use crate::paint::Color;

use super::{
    BlendMode, DeviceCaps, DeviceError, DrawCommand, Geometry, GpuDevice, Shading, SurfaceFormat,
    TextureId, TextureSampling, VertexRange,
};

/// Counters for work submitted to a [`SoftwareDevice`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct SoftwareStats {
    pub draws: usize,
    pub clears: usize,
    pub uploads: usize,
    pub readbacks: usize,
    pub finishes: usize,
}

struct SoftTexture {
    size: IntSize,
    format: SurfaceFormat,
    data: Vec<u8>,
}

impl SoftTexture {
    fn bounds(&self) -> IntRect {
        IntRect::from_size(self.size)
    }

    fn row_bytes(&self) -> usize {
        self.size.width as usize * self.format.bytes_per_pixel()
    }

    fn offset(&self, x: i32, y: i32) -> usize {
        y as usize * self.row_bytes() + x as usize * self.format.bytes_per_pixel()
    }

    fn texel(&self, x: i32, y: i32) -> [f32; 4] {
        let o = self.offset(x, y);
        let f = |v: u8| v as f32 / 255.0;
        match self.format {
            SurfaceFormat::A8 => [0.0, 0.0, 0.0, f(self.data[o])],
            _ => [f(self.data[o]), f(self.data[o + 1]), f(self.data[o + 2]), f(self.data[o + 3])],
        }
    }
}

/// CPU implementation of [`GpuDevice`] with the same blending and sampling
/// rules as the wgpu backend.
///
/// Used for headless runs and tests. Device loss and texture memory
/// exhaustion can be simulated.
pub struct SoftwareDevice {
    caps: DeviceCaps,
    lost: Arc<AtomicBool>,
    textures: HashMap<TextureId, SoftTexture>,
    next_id: u32,
    vertices: Vec<PathVertex>,
    vertex_capacity: usize,
    memory_limit: Option<usize>,
    allocated_bytes: usize,
    stats: SoftwareStats,
}

impl SoftwareDevice {
    pub fn new(max_texture_size: i32) -> Self {
        Self {
            caps: DeviceCaps {
                max_texture_size,
                vendor: "ember".to_owned(),
                backend: "software".to_owned(),
            },
            lost: Arc::new(AtomicBool::new(false)),
            textures: HashMap::new(),
            next_id: 1,
            vertices: Vec::new(),
            vertex_capacity: 0,
            memory_limit: None,
            allocated_bytes: 0,
            stats: SoftwareStats::default(),
        }
    }

    /// Fails texture creation with `OutOfMemory` past `bytes` of live textures.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Simulates a device reset.
    pub fn lose(&mut self) {
        if !self.lost.swap(true, Ordering::AcqRel) {
            log::warn!("software device: simulated device loss");
        }
    }

    /// Shared loss flag. Storing `true` has the same effect as [`lose`](Self::lose)
    /// and works after the device has been moved into a context.
    pub fn lost_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.lost)
    }

    pub fn stats(&self) -> SoftwareStats {
        self.stats
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Premultiplied RGBA of one texel (A8 textures report `[0, 0, 0, a]`).
    pub fn pixel(&self, texture: TextureId, x: i32, y: i32) -> Option<[u8; 4]> {
        let tex = self.textures.get(&texture)?;
        if !tex.bounds().contains(IntRect::new(x, y, 1, 1)) {
            return None;
        }
        let o = tex.offset(x, y);
        Some(match tex.format {
            SurfaceFormat::A8 => [0, 0, 0, tex.data[o]],
            _ => [tex.data[o], tex.data[o + 1], tex.data[o + 2], tex.data[o + 3]],
        })
    }

    fn check_alive(&self) -> Result<(), DeviceError> {
        if self.is_lost() { Err(DeviceError::Lost) } else { Ok(()) }
    }

    // ── coverage ──────────────────────────────────────────────────────────

    fn quad_coverage(geometry: &Geometry, clip: IntRect, aa: bool) -> Option<Vec<f32>> {
        let Geometry::Quad { rect, transform } = geometry else { return None };
        let path = tiny_skia::PathBuilder::from_rect(rect.to_skia()?);
        let mut mask = tiny_skia::Mask::new(clip.width as u32, clip.height as u32)?;
        let local = transform.post_translate(-clip.x as f32, -clip.y as f32);
        mask.fill_path(&path, tiny_skia::FillRule::Winding, aa, local.to_skia());
        Some(mask.data().iter().map(|&a| a as f32 / 255.0).collect())
    }

    fn triangle_coverage(&self, range: VertexRange, offset: IntPoint, clip: IntRect) -> Result<Vec<f32>, DeviceError> {
        let end = range.end() as usize;
        if end > self.vertices.len() || range.count % 3 != 0 {
            return Err(DeviceError::InvalidRegion);
        }
        let mut cov = vec![0.0f32; clip.area()];
        let shift = Vec2::new(offset.x as f32, offset.y as f32);
        for tri in self.vertices[range.offset as usize..end].chunks_exact(3) {
            raster_triangle(tri, shift, clip, &mut cov);
        }
        Ok(cov)
    }

    fn draw_into(&self, target: &mut SoftTexture, cmd: &DrawCommand) -> Result<(), DeviceError> {
        if target.format.is_alpha_only() {
            return Err(DeviceError::Backend("A8 textures are not render targets".to_owned()));
        }
        let mut clip = target.bounds();
        if let Some(s) = cmd.scissor {
            clip = clip.intersect(s);
        }
        if clip.is_empty() {
            return Ok(());
        }

        let coverage = match cmd.geometry {
            Geometry::Quad { .. } => Self::quad_coverage(&cmd.geometry, clip, cmd.aa).unwrap_or_default(),
            Geometry::Triangles { range, offset } => self.triangle_coverage(range, offset, clip)?,
        };
        if coverage.is_empty() {
            return Ok(());
        }

        let source = match &cmd.shading {
            Shading::Texture(s) => {
                let tex = self.textures.get(&s.texture).ok_or(DeviceError::UnknownTexture(s.texture))?;
                Some((tex, s))
            }
            Shading::Solid(_) => None,
        };

        for row in 0..clip.height {
            for col in 0..clip.width {
                let c = coverage[(row * clip.width + col) as usize];
                if c <= 0.0 {
                    continue;
                }
                let (x, y) = (clip.x + col, clip.y + row);
                let src = match (&cmd.shading, source) {
                    (Shading::Solid(color), _) => color.to_array(),
                    (_, Some((tex, s))) => sample(tex, s, x, y),
                    _ => continue,
                };
                let o = target.offset(x, y);
                let px = &mut target.data[o..o + 4];
                let dst = [px[0], px[1], px[2], px[3]].map(|v| v as f32 / 255.0);
                let out = blend(cmd.blend, src, dst, c.min(1.0));
                for (d, v) in px.iter_mut().zip(out) {
                    *d = (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
                }
            }
        }
        Ok(())
    }
}

// ── rasterization helpers ─────────────────────────────────────────────────

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Pixel-center rasterization with interpolated coverage. Overlapping
/// triangles combine with max, so shared edges are not counted twice.
fn raster_triangle(tri: &[PathVertex], shift: Vec2, clip: IntRect, cov: &mut [f32]) {
    let p = |v: &PathVertex| Vec2::new(v.pos[0], v.pos[1]) + shift;
    let (a, b, c) = (p(&tri[0]), p(&tri[1]), p(&tri[2]));
    let area = edge(a, b, c);
    if area == 0.0 {
        return;
    }
    let x0 = (a.x.min(b.x).min(c.x).floor() as i32).max(clip.x);
    let y0 = (a.y.min(b.y).min(c.y).floor() as i32).max(clip.y);
    let x1 = (a.x.max(b.x).max(c.x).ceil() as i32).min(clip.xmost());
    let y1 = (a.y.max(b.y).max(c.y).ceil() as i32).min(clip.ymost());

    for y in y0..y1 {
        for x in x0..x1 {
            let pc = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let (w0, w1, w2) = (edge(b, c, pc) / area, edge(c, a, pc) / area, edge(a, b, pc) / area);
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let value = w0 * tri[0].coverage + w1 * tri[1].coverage + w2 * tri[2].coverage;
            let idx = ((y - clip.y) * clip.width + (x - clip.x)) as usize;
            cov[idx] = cov[idx].max(value);
        }
    }
}

fn sample(tex: &SoftTexture, s: &TextureSampling, x: i32, y: i32) -> [f32; 4] {
    let b = s.bounds.intersect(tex.bounds());
    if b.is_empty() {
        return [0.0; 4];
    }
    let t = s.uv_transform.map_point(Vec2::new(x as f32 + 0.5, y as f32 + 0.5));
    let tx = t.x.clamp(b.x as f32 + 0.5, b.xmost() as f32 - 0.5);
    let ty = t.y.clamp(b.y as f32 + 0.5, b.ymost() as f32 - 0.5);

    let texel = if s.nearest {
        let ix = (tx.floor() as i32).clamp(b.x, b.xmost() - 1);
        let iy = (ty.floor() as i32).clamp(b.y, b.ymost() - 1);
        tex.texel(ix, iy)
    } else {
        let (fx, fy) = (tx - 0.5, ty - 0.5);
        let (ix, iy) = (fx.floor() as i32, fy.floor() as i32);
        let (wx, wy) = (fx - ix as f32, fy - iy as f32);
        let at = |x: i32, y: i32| tex.texel(x.clamp(b.x, b.xmost() - 1), y.clamp(b.y, b.ymost() - 1));
        let (t00, t10, t01, t11) = (at(ix, iy), at(ix + 1, iy), at(ix, iy + 1), at(ix + 1, iy + 1));
        let mut out = [0.0; 4];
        for i in 0..4 {
            let top = t00[i] * (1.0 - wx) + t10[i] * wx;
            let bottom = t01[i] * (1.0 - wx) + t11[i] * wx;
            out[i] = top * (1.0 - wy) + bottom * wy;
        }
        out
    };

    let color = s.color.to_array();
    if s.alpha_mask {
        color.map(|c| c * texel[3])
    } else {
        [texel[0] * color[0], texel[1] * color[1], texel[2] * color[2], texel[3] * color[3]]
    }
}

fn blend(mode: BlendMode, src: [f32; 4], dst: [f32; 4], coverage: f32) -> [f32; 4] {
    let s = src.map(|v| v * coverage);
    let mut out = [0.0; 4];
    match mode {
        BlendMode::Over => {
            for i in 0..4 {
                out[i] = s[i] + dst[i] * (1.0 - s[3]);
            }
        }
        BlendMode::Add => {
            for i in 0..4 {
                out[i] = (s[i] + dst[i]).min(1.0);
            }
        }
        BlendMode::Atop => {
            for i in 0..3 {
                out[i] = s[i] * dst[3] + dst[i] * (1.0 - s[3]);
            }
            out[3] = dst[3];
        }
        BlendMode::Source => {
            for i in 0..4 {
                out[i] = s[i] + dst[i] * (1.0 - coverage);
            }
        }
    }
    out
}

impl GpuDevice for SoftwareDevice {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn create_texture(&mut self, size: IntSize, format: SurfaceFormat) -> Result<TextureId, DeviceError> {
        self.check_alive()?;
        if size.is_empty() || size.max_dim() > self.caps.max_texture_size {
            return Err(DeviceError::InvalidRegion);
        }
        let format = format.storage();
        let bytes = size.area() * format.bytes_per_pixel();
        if let Some(limit) = self.memory_limit {
            if self.allocated_bytes + bytes > limit {
                return Err(DeviceError::OutOfMemory);
            }
        }
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.allocated_bytes += bytes;
        self.textures.insert(id, SoftTexture { size, format, data: vec![0; bytes] });
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(tex) = self.textures.remove(&texture) {
            self.allocated_bytes -= tex.data.len();
        }
    }

    fn upload(
        &mut self,
        texture: TextureId,
        origin: IntPoint,
        size: IntSize,
        data: Option<&[u8]>,
        stride: usize,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        let tex = self.textures.get_mut(&texture).ok_or(DeviceError::UnknownTexture(texture))?;
        let region = IntRect::from_origin_size(origin, size);
        if region.is_empty() || !tex.bounds().contains(region) {
            return Err(DeviceError::InvalidRegion);
        }
        let row = size.width as usize * tex.format.bytes_per_pixel();
        if let Some(d) = data {
            if stride < row || d.len() < (size.height as usize - 1) * stride + row {
                return Err(DeviceError::InvalidRegion);
            }
        }
        for r in 0..size.height {
            let o = tex.offset(origin.x, origin.y + r);
            let dst = &mut tex.data[o..o + row];
            match data {
                Some(d) => {
                    let s = r as usize * stride;
                    dst.copy_from_slice(&d[s..s + row]);
                }
                None => dst.fill(0),
            }
        }
        self.stats.uploads += 1;
        Ok(())
    }

    fn clear(&mut self, target: TextureId, rect: IntRect, color: Color) -> Result<(), DeviceError> {
        self.check_alive()?;
        let tex = self.textures.get_mut(&target).ok_or(DeviceError::UnknownTexture(target))?;
        let r = rect.intersect(tex.bounds());
        let px = color.to_premul_rgba8();
        let bpp = tex.format.bytes_per_pixel();
        for y in r.y..r.ymost() {
            for x in r.x..r.xmost() {
                let o = tex.offset(x, y);
                if bpp == 1 {
                    tex.data[o] = px[3];
                } else {
                    tex.data[o..o + 4].copy_from_slice(&px);
                }
            }
        }
        self.stats.clears += 1;
        Ok(())
    }

    fn draw(&mut self, cmd: &DrawCommand) -> Result<(), DeviceError> {
        self.check_alive()?;
        if let Shading::Texture(s) = &cmd.shading {
            if s.texture == cmd.target {
                return Err(DeviceError::Backend("texture sampled while bound as target".to_owned()));
            }
        }
        let mut target = self.textures.remove(&cmd.target).ok_or(DeviceError::UnknownTexture(cmd.target))?;
        let result = self.draw_into(&mut target, cmd);
        self.textures.insert(cmd.target, target);
        self.stats.draws += 1;
        result
    }

    fn reset_vertex_buffer(&mut self, capacity: usize) -> Result<(), DeviceError> {
        self.check_alive()?;
        self.vertices.clear();
        self.vertex_capacity = capacity;
        Ok(())
    }

    fn write_vertices(&mut self, offset: usize, vertices: &[PathVertex]) -> Result<(), DeviceError> {
        self.check_alive()?;
        let end = offset + vertices.len();
        if end > self.vertex_capacity {
            return Err(DeviceError::InvalidRegion);
        }
        if self.vertices.len() < end {
            self.vertices.resize(end, PathVertex::default());
        }
        self.vertices[offset..end].copy_from_slice(vertices);
        Ok(())
    }

    fn read_pixels(&mut self, texture: TextureId, rect: IntRect, dst: &mut [u8], stride: usize) -> Result<(), DeviceError> {
        self.check_alive()?;
        let tex = self.textures.get(&texture).ok_or(DeviceError::UnknownTexture(texture))?;
        if rect.is_empty() || !tex.bounds().contains(rect) {
            return Err(DeviceError::InvalidRegion);
        }
        let row = rect.width as usize * tex.format.bytes_per_pixel();
        if stride < row || dst.len() < (rect.height as usize - 1) * stride + row {
            return Err(DeviceError::InvalidRegion);
        }
        for r in 0..rect.height {
            let o = tex.offset(rect.x, rect.y + r);
            let d = r as usize * stride;
            dst[d..d + row].copy_from_slice(&tex.data[o..o + row]);
        }
        self.stats.readbacks += 1;
        Ok(())
    }

    fn finish(&mut self) {
        self.stats.finishes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::{Rect, Transform};

    fn device() -> SoftwareDevice {
        SoftwareDevice::new(1024)
    }

    fn solid_quad(target: TextureId, rect: Rect, color: Color, blend: BlendMode) -> DrawCommand {
        DrawCommand {
            target,
            scissor: None,
            blend,
            geometry: Geometry::Quad { rect, transform: Transform::identity() },
            shading: Shading::Solid(color),
            aa: false,
        }
    }

    // ── textures ──────────────────────────────────────────────────────────

    #[test]
    fn create_rejects_oversized_textures() {
        let mut d = device();
        assert_eq!(d.create_texture(IntSize::new(2048, 4), SurfaceFormat::Rgba8), Err(DeviceError::InvalidRegion));
    }

    #[test]
    fn memory_limit_reports_oom() {
        let mut d = SoftwareDevice::new(1024).with_memory_limit(100);
        assert!(d.create_texture(IntSize::new(4, 4), SurfaceFormat::Rgba8).is_ok());
        assert_eq!(d.create_texture(IntSize::new(4, 4), SurfaceFormat::Rgba8), Err(DeviceError::OutOfMemory));
    }

    #[test]
    fn upload_then_read_back() {
        let mut d = device();
        let t = d.create_texture(IntSize::new(4, 4), SurfaceFormat::Rgba8).unwrap();
        let data: Vec<u8> = (0..16u8).collect();
        d.upload(t, IntPoint::new(1, 1), IntSize::new(2, 2), Some(&data), 8).unwrap();
        let mut out = vec![0u8; 16];
        d.read_pixels(t, IntRect::new(1, 1, 2, 2), &mut out, 8).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn upload_outside_texture_fails() {
        let mut d = device();
        let t = d.create_texture(IntSize::new(4, 4), SurfaceFormat::A8).unwrap();
        assert_eq!(d.upload(t, IntPoint::new(3, 3), IntSize::new(2, 2), None, 2), Err(DeviceError::InvalidRegion));
    }

    #[test]
    fn lost_device_fails_everything() {
        let mut d = device();
        let t = d.create_texture(IntSize::new(4, 4), SurfaceFormat::Rgba8).unwrap();
        d.lose();
        assert!(d.is_lost());
        assert_eq!(d.clear(t, IntRect::new(0, 0, 4, 4), Color::black()), Err(DeviceError::Lost));
        assert_eq!(d.create_texture(IntSize::new(4, 4), SurfaceFormat::Rgba8), Err(DeviceError::Lost));
    }

    // ── drawing ───────────────────────────────────────────────────────────

    #[test]
    fn solid_quad_over_respects_scissor() {
        let mut d = device();
        let t = d.create_texture(IntSize::new(8, 8), SurfaceFormat::Rgba8).unwrap();
        let mut cmd = solid_quad(t, Rect::new(0.0, 0.0, 8.0, 8.0), Color::from_rgba8(255, 0, 0, 255), BlendMode::Over);
        cmd.scissor = Some(IntRect::new(2, 2, 2, 2));
        d.draw(&cmd).unwrap();
        assert_eq!(d.pixel(t, 2, 2), Some([255, 0, 0, 255]));
        assert_eq!(d.pixel(t, 4, 4), Some([0, 0, 0, 0]));
    }

    #[test]
    fn add_saturates() {
        let mut d = device();
        let t = d.create_texture(IntSize::new(2, 2), SurfaceFormat::Rgba8).unwrap();
        d.clear(t, IntRect::new(0, 0, 2, 2), Color::from_premul(0.75, 0.0, 0.0, 0.75)).unwrap();
        d.draw(&solid_quad(t, Rect::new(0.0, 0.0, 2.0, 2.0), Color::from_premul(0.5, 0.0, 0.0, 0.5), BlendMode::Add)).unwrap();
        assert_eq!(d.pixel(t, 0, 0), Some([255, 0, 0, 255]));
    }

    #[test]
    fn atop_keeps_destination_alpha() {
        let mut d = device();
        let t = d.create_texture(IntSize::new(2, 1), SurfaceFormat::Rgba8).unwrap();
        d.clear(t, IntRect::new(0, 0, 1, 1), Color::white()).unwrap();
        d.draw(&solid_quad(t, Rect::new(0.0, 0.0, 2.0, 1.0), Color::from_rgba8(0, 0, 255, 255), BlendMode::Atop)).unwrap();
        assert_eq!(d.pixel(t, 0, 0), Some([0, 0, 255, 255]));
        assert_eq!(d.pixel(t, 1, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn textured_quad_samples_page_region() {
        let mut d = device();
        let page = d.create_texture(IntSize::new(8, 8), SurfaceFormat::A8).unwrap();
        d.upload(page, IntPoint::new(4, 4), IntSize::new(2, 2), Some(&[255; 4]), 2).unwrap();
        let fb = d.create_texture(IntSize::new(8, 8), SurfaceFormat::Rgba8).unwrap();
        let cmd = DrawCommand {
            target: fb,
            scissor: None,
            blend: BlendMode::Over,
            geometry: Geometry::Quad { rect: Rect::new(0.0, 0.0, 2.0, 2.0), transform: Transform::identity() },
            shading: Shading::Texture(TextureSampling {
                texture: page,
                uv_transform: Transform::translation(4.0, 4.0),
                bounds: IntRect::new(4, 4, 2, 2),
                color: Color::from_rgba8(0, 255, 0, 255),
                alpha_mask: true,
                nearest: true,
            }),
            aa: false,
        };
        d.draw(&cmd).unwrap();
        assert_eq!(d.pixel(fb, 1, 1), Some([0, 255, 0, 255]));
        assert_eq!(d.pixel(fb, 2, 2), Some([0, 0, 0, 0]));
    }

    #[test]
    fn triangle_spans_cover_exact_pixels() {
        let mut d = device();
        let fb = d.create_texture(IntSize::new(8, 8), SurfaceFormat::Rgba8).unwrap();
        let path = crate::geom::Path::rect(Rect::new(1.0, 1.0, 3.0, 2.0)).unwrap();
        let verts = crate::geom::tessellate_spans(&path, Transform::identity(), IntRect::new(0, 0, 8, 8), false).unwrap();
        d.reset_vertex_buffer(64).unwrap();
        d.write_vertices(0, &verts).unwrap();
        let cmd = DrawCommand {
            target: fb,
            scissor: None,
            blend: BlendMode::Over,
            geometry: Geometry::Triangles {
                range: VertexRange { offset: 0, count: verts.len() as u32 },
                offset: IntPoint::default(),
            },
            shading: Shading::Solid(Color::white()),
            aa: true,
        };
        d.draw(&cmd).unwrap();
        assert_eq!(d.pixel(fb, 1, 1), Some([255; 4]));
        assert_eq!(d.pixel(fb, 3, 2), Some([255; 4]));
        assert_eq!(d.pixel(fb, 4, 1), Some([0; 4]));
        assert_eq!(d.pixel(fb, 1, 3), Some([0; 4]));
    }

    #[test]
    fn vertex_writes_past_capacity_fail() {
        let mut d = device();
        d.reset_vertex_buffer(4).unwrap();
        assert_eq!(d.write_vertices(2, &[PathVertex::default(); 3]), Err(DeviceError::InvalidRegion));
    }
}
