use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use hashbrown::HashMap;
use wgpu::util::DeviceExt;

use crate::coords::{IntPoint, IntRect, IntSize, Vec2};
use crate::geom::PathVertex;
use crate::paint::Color;

use super::{
    BlendMode, DeviceCaps, DeviceError, DeviceInit, DrawCommand, Geometry, GpuDevice, Shading,
    SurfaceFormat, TextureId,
};

// ── GPU types ─────────────────────────────────────────────────────────────

/// Per-draw uniform block (96 bytes), mirrored by `Params` in canvas.wgsl.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct DrawParams {
    viewport: [f32; 4],
    uv_row0: [f32; 4],
    uv_row1: [f32; 4],
    color: [f32; 4],
    tex_bounds: [f32; 4],
    tex_info: [f32; 4],
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: IntSize,
    format: SurfaceFormat,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
enum ShaderKind {
    Solid,
    Image,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
struct PipelineKey {
    shader: ShaderKind,
    blend: BlendMode,
}

fn texture_format(format: SurfaceFormat) -> wgpu::TextureFormat {
    match format.storage() {
        SurfaceFormat::A8 => wgpu::TextureFormat::R8Unorm,
        _ => wgpu::TextureFormat::Rgba8Unorm,
    }
}

fn blend_state(mode: BlendMode) -> wgpu::BlendState {
    let component = |src_factor, dst_factor| wgpu::BlendComponent {
        src_factor,
        dst_factor,
        operation: wgpu::BlendOperation::Add,
    };
    use wgpu::BlendFactor as F;
    match mode {
        BlendMode::Over => wgpu::BlendState {
            color: component(F::One, F::OneMinusSrcAlpha),
            alpha: component(F::One, F::OneMinusSrcAlpha),
        },
        BlendMode::Add => wgpu::BlendState {
            color: component(F::One, F::One),
            alpha: component(F::One, F::One),
        },
        BlendMode::Atop => wgpu::BlendState {
            color: component(F::DstAlpha, F::OneMinusSrcAlpha),
            alpha: component(F::Zero, F::One),
        },
        BlendMode::Source => wgpu::BlendState::REPLACE,
    }
}

fn map_error(err: impl std::fmt::Display) -> DeviceError {
    DeviceError::Backend(err.to_string())
}

// ── device ────────────────────────────────────────────────────────────────

/// Headless wgpu implementation of [`GpuDevice`].
///
/// Every draw is recorded into its own encoder and submitted immediately;
/// the queue orders them. Quad edges are not antialiased on this backend.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: DeviceCaps,
    lost: Arc<AtomicBool>,

    textures: HashMap<TextureId, GpuTexture>,
    next_id: u32,

    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    /// Bound in place of a source texture for solid draws.
    placeholder: wgpu::TextureView,

    vertex_buffer: Option<wgpu::Buffer>,
    vertex_capacity: usize,
}

impl WgpuDevice {
    /// Creates a headless device. Adapter/device acquisition is asynchronous
    /// under wgpu; see [`WgpuDevice::new_blocking`].
    pub async fn new(init: DeviceInit) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: init.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: init.force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("ember-canvas device"),
                required_features: init.required_features,
                required_limits: init.required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let info = adapter.get_info();
        let max_texture_size = i32::try_from(device.limits().max_texture_dimension_2d)
            .context("max texture dimension out of range")?;
        anyhow::ensure!(max_texture_size > 0, "adapter reports zero texture size");
        log::info!("ember-canvas: using {} ({:?}), max texture {max_texture_size}", info.name, info.backend);

        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            log::warn!("ember-canvas: device lost ({reason:?}): {message}");
            flag.store(true, Ordering::Release);
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("ember canvas shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/canvas.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ember canvas bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<DrawParams>() as u64),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ember canvas pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let sampler = |label, filter| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::MipmapFilterMode::Nearest,
                ..Default::default()
            })
        };
        let linear_sampler = sampler("ember canvas linear sampler", wgpu::FilterMode::Linear);
        let nearest_sampler = sampler("ember canvas nearest sampler", wgpu::FilterMode::Nearest);

        let placeholder = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("ember canvas placeholder"),
                size: wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            device,
            queue,
            caps: DeviceCaps {
                max_texture_size,
                vendor: info.name,
                backend: format!("{:?}", info.backend),
            },
            lost,
            textures: HashMap::new(),
            next_id: 1,
            shader,
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            linear_sampler,
            nearest_sampler,
            placeholder,
            vertex_buffer: None,
            vertex_capacity: 0,
        })
    }

    /// Blocking wrapper around [`WgpuDevice::new`].
    pub fn new_blocking(init: DeviceInit) -> Result<Self> {
        pollster::block_on(Self::new(init))
    }

    fn check_alive(&self) -> Result<(), DeviceError> {
        if self.lost.load(Ordering::Acquire) { Err(DeviceError::Lost) } else { Ok(()) }
    }

    fn texture(&self, id: TextureId) -> Result<&GpuTexture, DeviceError> {
        self.textures.get(&id).ok_or(DeviceError::UnknownTexture(id))
    }

    // ── lazy-init helpers ──────────────────────────────────────────────────

    fn ensure_pipeline(&mut self, key: PipelineKey) {
        if self.pipelines.contains_key(&key) {
            return;
        }
        let entry_point = match key.shader {
            ShaderKind::Solid => "fs_solid",
            ShaderKind::Image => "fs_image",
        };
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("ember canvas pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[PathVertex::layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    blend: Some(blend_state(key.blend)),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        log::debug!("ember-canvas: built pipeline {key:?}");
        self.pipelines.insert(key, pipeline);
    }

    fn quad_vertices(rect: crate::coords::Rect, transform: crate::coords::Transform) -> [PathVertex; 6] {
        let r = rect.normalized();
        let corner = |x: f32, y: f32| {
            let p = transform.map_point(Vec2::new(x, y));
            PathVertex { pos: [p.x, p.y], coverage: 1.0 }
        };
        let (a, b) = (r.min(), r.max());
        let (v0, v1, v2, v3) = (corner(a.x, a.y), corner(b.x, a.y), corner(b.x, b.y), corner(a.x, b.y));
        [v0, v1, v2, v0, v2, v3]
    }
}

impl GpuDevice for WgpuDevice {
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
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if format != SurfaceFormat::A8 {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("ember canvas texture"),
            size: wgpu::Extent3d {
                width: size.width as u32,
                height: size.height as u32,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.textures.insert(id, GpuTexture { texture, view, size, format });
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(t) = self.textures.remove(&texture) {
            t.texture.destroy();
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
        let tex = self.texture(texture)?;
        let region = IntRect::from_origin_size(origin, size);
        if region.is_empty() || !IntRect::from_size(tex.size).contains(region) {
            return Err(DeviceError::InvalidRegion);
        }
        let row = size.width as usize * tex.format.bytes_per_pixel();
        let (bytes, stride) = match data {
            Some(d) => {
                let needed = (size.height as usize - 1) * stride + row;
                if stride < row || d.len() < needed {
                    return Err(DeviceError::InvalidRegion);
                }
                (std::borrow::Cow::Borrowed(&d[..needed]), stride)
            }
            None => (std::borrow::Cow::Owned(vec![0u8; row * size.height as usize]), row),
        };
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: origin.x as u32, y: origin.y as u32, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            &bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(stride as u32),
                rows_per_image: Some(size.height as u32),
            },
            wgpu::Extent3d { width: size.width as u32, height: size.height as u32, depth_or_array_layers: 1 },
        );
        Ok(())
    }

    fn clear(&mut self, target: TextureId, rect: IntRect, color: Color) -> Result<(), DeviceError> {
        self.check_alive()?;
        let tex = self.texture(target)?;
        let full = IntRect::from_size(tex.size);
        if !rect.contains(full) {
            return self.draw(&DrawCommand {
                target,
                scissor: Some(rect),
                blend: BlendMode::Source,
                geometry: Geometry::Quad { rect: full.into(), transform: crate::coords::Transform::identity() },
                shading: Shading::Solid(color),
                aa: false,
            });
        }
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("ember canvas clear"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("ember canvas clear pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &tex.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: color.r as f64,
                            g: color.g as f64,
                            b: color.b as f64,
                            a: color.a as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn draw(&mut self, cmd: &DrawCommand) -> Result<(), DeviceError> {
        self.check_alive()?;
        let key = PipelineKey {
            shader: match cmd.shading {
                Shading::Solid(_) => ShaderKind::Solid,
                Shading::Texture(_) => ShaderKind::Image,
            },
            blend: cmd.blend,
        };
        self.ensure_pipeline(key);

        let target = self.texture(cmd.target)?;
        if target.format == SurfaceFormat::A8 {
            return Err(DeviceError::Backend("A8 textures are not render targets".to_owned()));
        }
        let mut scissor = IntRect::from_size(target.size);
        if let Some(s) = cmd.scissor {
            scissor = scissor.intersect(s);
        }
        if scissor.is_empty() {
            return Ok(());
        }

        let mut params = DrawParams {
            viewport: [target.size.width as f32, target.size.height as f32, 0.0, 0.0],
            uv_row0: [0.0; 4],
            uv_row1: [0.0; 4],
            color: [0.0; 4],
            tex_bounds: [0.0; 4],
            tex_info: [1.0, 1.0, 0.0, 0.0],
        };
        let (source_view, sampler) = match &cmd.shading {
            Shading::Solid(c) => {
                params.color = c.to_array();
                (&self.placeholder, &self.nearest_sampler)
            }
            Shading::Texture(s) => {
                if s.texture == cmd.target {
                    return Err(DeviceError::Backend("texture sampled while bound as target".to_owned()));
                }
                let src = self.texture(s.texture)?;
                let t = s.uv_transform;
                params.uv_row0 = [t.sx, t.kx, t.tx, 0.0];
                params.uv_row1 = [t.ky, t.sy, t.ty, 0.0];
                params.color = s.color.to_array();
                params.tex_bounds = [
                    s.bounds.x as f32,
                    s.bounds.y as f32,
                    s.bounds.xmost() as f32,
                    s.bounds.ymost() as f32,
                ];
                params.tex_info = [
                    src.size.width as f32,
                    src.size.height as f32,
                    if s.alpha_mask || src.format == SurfaceFormat::A8 { 1.0 } else { 0.0 },
                    if src.format == SurfaceFormat::A8 { 1.0 } else { 0.0 },
                ];
                let sampler = if s.nearest { &self.nearest_sampler } else { &self.linear_sampler };
                (&src.view, sampler)
            }
        };

        if let Geometry::Triangles { offset, .. } = cmd.geometry {
            params.viewport[2] = offset.x as f32;
            params.viewport[3] = offset.y as f32;
        }

        let uniform = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ember canvas params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ember canvas bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: uniform.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(source_view) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(sampler) },
            ],
        });

        let quad_buffer;
        let (vertex_slice, vertex_count) = match cmd.geometry {
            Geometry::Quad { rect, transform } => {
                let verts = Self::quad_vertices(rect, transform);
                quad_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("ember canvas quad vbo"),
                    contents: bytemuck::cast_slice(&verts),
                    usage: wgpu::BufferUsages::VERTEX,
                });
                (quad_buffer.slice(..), verts.len() as u32)
            }
            Geometry::Triangles { range, .. } => {
                let Some(buffer) = self.vertex_buffer.as_ref() else {
                    return Err(DeviceError::InvalidRegion);
                };
                if range.end() as usize > self.vertex_capacity || range.count == 0 {
                    return Err(DeviceError::InvalidRegion);
                }
                let stride = std::mem::size_of::<PathVertex>() as u64;
                let start = range.offset as u64 * stride;
                let end = range.end() as u64 * stride;
                (buffer.slice(start..end), range.count)
            }
        };

        let Some(pipeline) = self.pipelines.get(&key) else {
            return Err(DeviceError::Backend("pipeline missing".to_owned()));
        };

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("ember canvas draw"),
        });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("ember canvas pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(0, &bind_group, &[]);
            rpass.set_vertex_buffer(0, vertex_slice);
            rpass.set_scissor_rect(
                scissor.x as u32,
                scissor.y as u32,
                scissor.width as u32,
                scissor.height as u32,
            );
            rpass.draw(0..vertex_count, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn reset_vertex_buffer(&mut self, capacity: usize) -> Result<(), DeviceError> {
        self.check_alive()?;
        let size = (capacity.max(1) * std::mem::size_of::<PathVertex>()) as u64;
        self.vertex_buffer = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ember canvas path vbo"),
            size,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        self.vertex_capacity = capacity;
        Ok(())
    }

    fn write_vertices(&mut self, offset: usize, vertices: &[PathVertex]) -> Result<(), DeviceError> {
        self.check_alive()?;
        let Some(buffer) = self.vertex_buffer.as_ref() else {
            return Err(DeviceError::InvalidRegion);
        };
        if offset + vertices.len() > self.vertex_capacity {
            return Err(DeviceError::InvalidRegion);
        }
        let at = (offset * std::mem::size_of::<PathVertex>()) as u64;
        self.queue.write_buffer(buffer, at, bytemuck::cast_slice(vertices));
        Ok(())
    }

    fn read_pixels(&mut self, texture: TextureId, rect: IntRect, dst: &mut [u8], stride: usize) -> Result<(), DeviceError> {
        self.check_alive()?;
        let tex = self.texture(texture)?;
        if rect.is_empty() || !IntRect::from_size(tex.size).contains(rect) {
            return Err(DeviceError::InvalidRegion);
        }
        let row = rect.width as usize * tex.format.bytes_per_pixel();
        if stride < row || dst.len() < (rect.height as usize - 1) * stride + row {
            return Err(DeviceError::InvalidRegion);
        }
        let padded = row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ember canvas readback"),
            size: (padded * rect.height as usize) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("ember canvas readback"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: rect.x as u32, y: rect.y as u32, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(rect.height as u32),
                },
            },
            wgpu::Extent3d { width: rect.width as u32, height: rect.height as u32, depth_or_array_layers: 1 },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::PollType::wait_indefinitely()).map_err(map_error)?;
        receiver
            .recv()
            .map_err(map_error)?
            .map_err(map_error)?;
        {
            let mapped = slice.get_mapped_range();
            for (r, src) in mapped.chunks_exact(padded).take(rect.height as usize).enumerate() {
                let d = r * stride;
                dst[d..d + row].copy_from_slice(&src[..row]);
            }
        }
        buffer.unmap();
        Ok(())
    }

    fn finish(&mut self) {
        if let Err(err) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            log::warn!("ember-canvas: poll failed: {err}");
        }
    }
}
