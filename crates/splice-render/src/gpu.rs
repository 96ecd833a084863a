//! wgpu-backed drawing surface, enabled with the `gpu` feature.
//!
//! The composed frame stays in host memory between draws; each draw
//! uploads it, renders the source quad over it with the same effect
//! branches as the CPU path, and reads it back.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use wgpu::util::DeviceExt;
use wgpu::{
    Adapter, Device, Extent3d, Instance, Queue, Texture, TextureDescriptor, TextureFormat,
    TextureUsages,
};

use splice_core::FrameBuffer;
use splice_ir::EffectParams;

use crate::compositor::Rect;
use crate::effects;

const FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

#[derive(Hash, Eq, PartialEq, Clone)]
struct TextureDescKey {
    width: u32,
    height: u32,
    usage: TextureUsages,
}

/// Free textures keyed by size and usage, reused across draws.
pub struct TexturePool {
    free_textures: Mutex<HashMap<TextureDescKey, Vec<Texture>>>,
}

impl TexturePool {
    pub fn new() -> Self {
        Self {
            free_textures: Mutex::new(HashMap::new()),
        }
    }

    pub fn acquire(
        &self,
        device: &Device,
        label: Option<&str>,
        width: u32,
        height: u32,
        usage: TextureUsages,
    ) -> Texture {
        let key = TextureDescKey {
            width,
            height,
            usage,
        };
        let mut pool = self
            .free_textures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(texture) = pool.get_mut(&key).and_then(Vec::pop) {
            return texture;
        }
        device.create_texture(&TextureDescriptor {
            label,
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FORMAT,
            usage,
            view_formats: &[],
        })
    }

    pub fn release(&self, texture: Texture, width: u32, height: u32, usage: TextureUsages) {
        let key = TextureDescKey {
            width,
            height,
            usage,
        };
        let mut pool = self
            .free_textures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pool.entry(key).or_default().push(texture);
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}

pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    pub texture_pool: TexturePool,
}

impl GpuContext {
    /// Headless device on the best available backend.
    pub fn init() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow::anyhow!("no suitable wgpu adapter"))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("splice compositor device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .context("requesting wgpu device")?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            texture_pool: TexturePool::new(),
        })
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 2],
    uv: [f32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct DrawParams {
    selector: u32,
    intensity: f32,
    seed: f32,
    pad: f32,
}

pub struct GpuCompositor {
    gpu: GpuContext,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    width: u32,
    height: u32,
}

impl GpuCompositor {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if !is_bytes_per_row_aligned(width) {
            anyhow::bail!(
                "surface width {} does not meet the {}-byte row alignment for readback",
                width,
                wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
            );
        }
        let gpu = GpuContext::init()?;

        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("composite_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/composite.wgsl").into()),
        });

        let bind_group_layout =
            gpu.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("composite_bind_group_layout"),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                multisampled: false,
                                view_dimension: wgpu::TextureViewDimension::D2,
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 1,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 2,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                    ],
                });

        let pipeline_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("composite_pipeline_layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline = gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("composite_pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_main",
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: FORMAT,
                        blend: Some(wgpu::BlendState {
                            color: wgpu::BlendComponent {
                                src_factor: wgpu::BlendFactor::SrcAlpha,
                                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                                operation: wgpu::BlendOperation::Add,
                            },
                            alpha: wgpu::BlendComponent::OVER,
                        }),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });

        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Ok(Self {
            gpu,
            pipeline,
            bind_group_layout,
            sampler,
            width,
            height,
        })
    }

    pub fn draw(
        &self,
        surface: &mut FrameBuffer,
        source: &FrameBuffer,
        rect: Rect,
        effect: &EffectParams,
        time: f64,
    ) -> Result<()> {
        if surface.width != self.width || surface.height != self.height {
            anyhow::bail!(
                "surface is {}x{}, device targets {}x{}",
                surface.width,
                surface.height,
                self.width,
                self.height
            );
        }
        let device = &self.gpu.device;
        let queue = &self.gpu.queue;
        let pool = &self.gpu.texture_pool;

        let dst_usage =
            TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC | TextureUsages::COPY_DST;
        let src_usage = TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST;
        let dst = pool.acquire(device, Some("composite_dst"), self.width, self.height, dst_usage);
        let src = pool.acquire(
            device,
            Some("composite_src"),
            source.width,
            source.height,
            src_usage,
        );
        upload(queue, &dst, surface);
        upload(queue, &src, source);

        let verts = quad_vertices(self.width as f32, self.height as f32, rect);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("composite_vertices"),
            contents: bytemuck::cast_slice(&verts),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let params = DrawParams {
            selector: effect.selector as u32,
            intensity: effect.intensity,
            seed: effects::noise_seed(time),
            pad: 0.0,
        };
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("composite_params"),
            contents: bytemuck::cast_slice(&[params]),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let src_view = src.create_view(&wgpu::TextureViewDescriptor::default());
        let dst_view = dst.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("composite_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&src_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("composite_readback"),
            size: (self.width * self.height * 4) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("composite_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &dst_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.draw(0..6, 0..1);
        }
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &dst,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.width * 4),
                    rows_per_image: Some(self.height),
                },
            },
            Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |mapped| {
            let _ = tx.send(mapped);
        });
        let _ = device.poll(wgpu::Maintain::Wait);
        let mapped = rx.recv().context("readback callback dropped");

        let (sw, sh) = (source.width, source.height);
        let result = match mapped {
            Ok(Ok(())) => {
                surface.data.copy_from_slice(&slice.get_mapped_range());
                readback.unmap();
                Ok(())
            }
            Ok(Err(e)) => Err(anyhow::anyhow!("mapping readback buffer: {}", e)),
            Err(e) => Err(e),
        };
        pool.release(dst, self.width, self.height, dst_usage);
        pool.release(src, sw, sh, src_usage);
        result
    }
}

fn upload(queue: &Queue, texture: &Texture, frame: &FrameBuffer) {
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &frame.data,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(frame.width * 4),
            rows_per_image: Some(frame.height),
        },
        Extent3d {
            width: frame.width,
            height: frame.height,
            depth_or_array_layers: 1,
        },
    );
}

fn is_bytes_per_row_aligned(width: u32) -> bool {
    let bytes_per_row = (width as usize) * 4;
    bytes_per_row % (wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize) == 0
}

/// Two triangles covering `rect`, in normalized device coordinates.
fn quad_vertices(width: f32, height: f32, rect: Rect) -> [Vertex; 6] {
    let to_ndc = |x: f64, y: f64| -> [f32; 2] {
        [
            (x as f32 / width) * 2.0 - 1.0,
            1.0 - (y as f32 / height) * 2.0,
        ]
    };
    let tl = to_ndc(rect.x, rect.y);
    let tr = to_ndc(rect.x + rect.width, rect.y);
    let br = to_ndc(rect.x + rect.width, rect.y + rect.height);
    let bl = to_ndc(rect.x, rect.y + rect.height);
    let v = |position: [f32; 2], uv: [f32; 2]| Vertex { position, uv };
    [
        v(tl, [0.0, 0.0]),
        v(bl, [0.0, 1.0]),
        v(br, [1.0, 1.0]),
        v(tl, [0.0, 0.0]),
        v(br, [1.0, 1.0]),
        v(tr, [1.0, 0.0]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_surface_quad_spans_ndc() {
        let verts = quad_vertices(64.0, 32.0, Rect::new(0.0, 0.0, 64.0, 32.0));
        assert_eq!(verts[0].position, [-1.0, 1.0]);
        assert_eq!(verts[2].position, [1.0, -1.0]);
        assert_eq!(verts[5].uv, [1.0, 0.0]);
    }

    #[test]
    fn test_row_alignment() {
        assert!(is_bytes_per_row_aligned(64));
        assert!(!is_bytes_per_row_aligned(30));
    }
}
