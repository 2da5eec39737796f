//! The wgpu-backed implementation of the render device abstraction.

use std::sync::Arc;

use ahash::AHashMap;
use glam::Mat4;
use opal_core::profiling::profile_function;
use opal_test_utils::{BlendMode, DeviceError, GpuTexture, RenderDevice};
use parking_lot::Mutex;
use tracing::warn;
use wgpu::util::DeviceExt;

use crate::context::GraphicsContext;
use crate::geometry::Vertex;

const QUAD_SHADER: &str = include_str!("shaders/quad.wgsl");
const BLIT_SHADER: &str = include_str!("shaders/blit.wgsl");

/// Depth range of the orthographic projection; quad z values outside this
/// range would be clipped.
const DEPTH_RANGE: f32 = 16384.0;

struct ActivePass {
    encoder: wgpu::CommandEncoder,
    pass: wgpu::RenderPass<'static>,
    target_size: (u32, u32),
    target_format: wgpu::TextureFormat,
}

/// Render device over a shared wgpu context.
///
/// Pipelines are sized for the quad vertex layout and created lazily per
/// target format; the host's frame texture is typically `Bgra8Unorm` while
/// GUI textures are `Rgba8Unorm`.
pub struct WgpuDevice {
    context: Arc<GraphicsContext>,
    quad_shader: wgpu::ShaderModule,
    blit_shader: wgpu::ShaderModule,
    texture_layout: wgpu::BindGroupLayout,
    projection_layout: wgpu::BindGroupLayout,
    quad_pipeline_layout: wgpu::PipelineLayout,
    blit_pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    quad_pipelines: Mutex<AHashMap<(wgpu::TextureFormat, BlendMode), Arc<wgpu::RenderPipeline>>>,
    blit_pipelines: Mutex<AHashMap<wgpu::TextureFormat, Arc<wgpu::RenderPipeline>>>,
    blend: Mutex<BlendMode>,
    pass: Mutex<Option<ActivePass>>,
}

impl WgpuDevice {
    pub fn new(context: Arc<GraphicsContext>) -> Self {
        let device = context.device();

        let quad_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Quad Shader"),
            source: wgpu::ShaderSource::Wgsl(QUAD_SHADER.into()),
        });
        let blit_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Quad Texture Bind Group Layout"),
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
            ],
        });

        let projection_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Quad Projection Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let quad_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Quad Pipeline Layout"),
                bind_group_layouts: &[&texture_layout, &projection_layout],
                push_constant_ranges: &[],
            });
        let blit_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Blit Pipeline Layout"),
                bind_group_layouts: &[&texture_layout],
                push_constant_ranges: &[],
            });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Quad Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            context,
            quad_shader,
            blit_shader,
            texture_layout,
            projection_layout,
            quad_pipeline_layout,
            blit_pipeline_layout,
            sampler,
            quad_pipelines: Mutex::new(AHashMap::new()),
            blit_pipelines: Mutex::new(AHashMap::new()),
            blend: Mutex::new(BlendMode::Normal),
            pass: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<GraphicsContext> {
        &self.context
    }

    fn quad_pipeline(
        &self,
        format: wgpu::TextureFormat,
        blend: BlendMode,
    ) -> Arc<wgpu::RenderPipeline> {
        let blend_state = match blend {
            BlendMode::Normal => wgpu::BlendState::ALPHA_BLENDING,
            BlendMode::Premultiplied => wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
        };
        let mut cache = self.quad_pipelines.lock();
        cache
            .entry((format, blend))
            .or_insert_with(|| {
                Arc::new(self.context.device().create_render_pipeline(
                    &wgpu::RenderPipelineDescriptor {
                        label: Some("Quad Pipeline"),
                        layout: Some(&self.quad_pipeline_layout),
                        vertex: wgpu::VertexState {
                            module: &self.quad_shader,
                            entry_point: Some("vs_main"),
                            buffers: &[wgpu::VertexBufferLayout {
                                array_stride: std::mem::size_of::<Vertex>() as u64,
                                step_mode: wgpu::VertexStepMode::Vertex,
                                attributes: &[
                                    wgpu::VertexAttribute {
                                        format: wgpu::VertexFormat::Float32x3,
                                        offset: 0,
                                        shader_location: 0,
                                    },
                                    wgpu::VertexAttribute {
                                        format: wgpu::VertexFormat::Uint32,
                                        offset: 12,
                                        shader_location: 1,
                                    },
                                    wgpu::VertexAttribute {
                                        format: wgpu::VertexFormat::Float32x2,
                                        offset: 16,
                                        shader_location: 2,
                                    },
                                ],
                            }],
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        },
                        fragment: Some(wgpu::FragmentState {
                            module: &self.quad_shader,
                            entry_point: Some("fs_main"),
                            targets: &[Some(wgpu::ColorTargetState {
                                format,
                                blend: Some(blend_state),
                                write_mask: wgpu::ColorWrites::ALL,
                            })],
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        }),
                        primitive: wgpu::PrimitiveState {
                            topology: wgpu::PrimitiveTopology::TriangleList,
                            cull_mode: None,
                            ..Default::default()
                        },
                        depth_stencil: None,
                        multisample: wgpu::MultisampleState::default(),
                        multiview: None,
                        cache: None,
                    },
                ))
            })
            .clone()
    }

    fn blit_pipeline(&self, format: wgpu::TextureFormat) -> Arc<wgpu::RenderPipeline> {
        let mut cache = self.blit_pipelines.lock();
        cache
            .entry(format)
            .or_insert_with(|| {
                Arc::new(self.context.device().create_render_pipeline(
                    &wgpu::RenderPipelineDescriptor {
                        label: Some("Blit Pipeline"),
                        layout: Some(&self.blit_pipeline_layout),
                        vertex: wgpu::VertexState {
                            module: &self.blit_shader,
                            entry_point: Some("vs_main"),
                            buffers: &[],
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        },
                        fragment: Some(wgpu::FragmentState {
                            module: &self.blit_shader,
                            entry_point: Some("fs_main"),
                            targets: &[Some(wgpu::ColorTargetState {
                                format,
                                blend: None,
                                write_mask: wgpu::ColorWrites::ALL,
                            })],
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        }),
                        primitive: wgpu::PrimitiveState {
                            topology: wgpu::PrimitiveTopology::TriangleList,
                            cull_mode: None,
                            ..Default::default()
                        },
                        depth_stencil: None,
                        multisample: wgpu::MultisampleState::default(),
                        multiview: None,
                        cache: None,
                    },
                ))
            })
            .clone()
    }

    fn texture_bind_group(&self, texture: &GpuTexture) -> wgpu::BindGroup {
        self.context
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Quad Texture Bind Group"),
                layout: &self.texture_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(texture.view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            })
    }

    fn projection_bind_group(&self, width: u32, height: u32) -> wgpu::BindGroup {
        let matrix = Mat4::orthographic_rh(
            0.0,
            width as f32,
            height as f32,
            0.0,
            -DEPTH_RANGE,
            DEPTH_RANGE,
        );
        let buffer = self
            .context
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Quad Projection Buffer"),
                contents: bytemuck::cast_slice(&matrix.to_cols_array()),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        self.context
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Quad Projection Bind Group"),
                layout: &self.projection_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            })
    }

    fn bytes_per_pixel(format: wgpu::TextureFormat) -> Result<u32, DeviceError> {
        match format {
            wgpu::TextureFormat::Rgba8Unorm
            | wgpu::TextureFormat::Rgba8UnormSrgb
            | wgpu::TextureFormat::Bgra8Unorm
            | wgpu::TextureFormat::Bgra8UnormSrgb => Ok(4),
            other => Err(DeviceError::UnsupportedFormat(other)),
        }
    }
}

impl RenderDevice for WgpuDevice {
    fn create_texture(&self, desc: &wgpu::TextureDescriptor) -> GpuTexture {
        GpuTexture::from_wgpu(self.context.device().create_texture(desc))
    }

    fn write_texture(&self, texture: &GpuTexture, data: &[u8]) {
        self.write_texture_region(texture, 0, 0, texture.width(), texture.height(), data);
    }

    fn write_texture_region(
        &self,
        texture: &GpuTexture,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        data: &[u8],
    ) {
        let bytes_per_pixel = match Self::bytes_per_pixel(texture.format()) {
            Ok(bpp) => bpp,
            Err(err) => {
                warn!(%err, "skipping texture upload");
                return;
            }
        };
        self.context.queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: texture.as_wgpu(),
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * bytes_per_pixel),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn read_texture(&self, texture: &GpuTexture) -> Result<Vec<u8>, DeviceError> {
        profile_function!();
        let bytes_per_pixel = Self::bytes_per_pixel(texture.format())?;
        let (width, height) = (texture.width(), texture.height());

        let unpadded_bytes_per_row = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let buffer = self.context.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (bytes_per_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Readback Encoder"),
                });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: texture.as_wgpu(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue().submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.context
            .device()
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| DeviceError::Readback(format!("device poll failed: {e:?}")))?;
        receiver
            .recv()
            .map_err(|_| DeviceError::Readback("map callback dropped".into()))?
            .map_err(|e| DeviceError::Readback(format!("buffer mapping failed: {e:?}")))?;

        let data = slice.get_mapped_range();
        let mut result = Vec::with_capacity((width * height * bytes_per_pixel) as usize);
        for row in 0..height {
            let start = (row * bytes_per_row) as usize;
            result.extend_from_slice(&data[start..start + unpadded_bytes_per_row as usize]);
        }
        drop(data);
        buffer.unmap();
        Ok(result)
    }

    fn copy_texture(&self, src: &GpuTexture, dst: &GpuTexture) -> Result<(), DeviceError> {
        if src.format() != dst.format()
            || dst.width() < src.width()
            || dst.height() < src.height()
        {
            return Err(DeviceError::CopyMismatch);
        }
        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Copy Encoder"),
                });
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: src.as_wgpu(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: dst.as_wgpu(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: src.width(),
                height: src.height(),
                depth_or_array_layers: 1,
            },
        );
        self.context.queue().submit(Some(encoder.finish()));
        Ok(())
    }

    fn blit_texture(&self, src: &GpuTexture, dst: &GpuTexture) -> Result<(), DeviceError> {
        if self.pass.lock().is_some() {
            return Err(DeviceError::PassUnavailable(
                "cannot blit while a pass is open".into(),
            ));
        }
        let pipeline = self.blit_pipeline(dst.format());
        let bind_group = self.texture_bind_group(src);

        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Blit Encoder"),
                });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Blit Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: dst.view(),
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.context.queue().submit(Some(encoder.finish()));
        Ok(())
    }

    fn clear_texture(&self, texture: &GpuTexture, color: wgpu::Color) {
        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Clear Encoder"),
                });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: texture.view(),
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(color),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.context.queue().submit(Some(encoder.finish()));
    }

    fn begin_pass(
        &self,
        target: &GpuTexture,
        clear: Option<wgpu::Color>,
    ) -> Result<(), DeviceError> {
        profile_function!();
        let mut active = self.pass.lock();
        if active.is_some() {
            return Err(DeviceError::PassUnavailable(
                "a render pass is already open".into(),
            ));
        }

        let pipeline = self.quad_pipeline(target.format(), *self.blend.lock());
        let projection = self.projection_bind_group(target.width(), target.height());

        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("GUI Pass Encoder"),
                });
        let mut pass = encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("GUI Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.view(),
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: match clear {
                            Some(color) => wgpu::LoadOp::Clear(color),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            })
            .forget_lifetime();
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(1, &projection, &[]);

        *active = Some(ActivePass {
            encoder,
            pass,
            target_size: (target.width(), target.height()),
            target_format: target.format(),
        });
        Ok(())
    }

    fn set_blend_mode(&self, mode: BlendMode) {
        // Lock order matches begin_pass: pass, then blend.
        let mut active = self.pass.lock();
        {
            let mut blend = self.blend.lock();
            if *blend == mode {
                return;
            }
            *blend = mode;
        }
        // A pass in flight switches pipelines immediately.
        if let Some(active) = active.as_mut() {
            let pipeline = self.quad_pipeline(active.target_format, mode);
            active.pass.set_pipeline(&pipeline);
        }
    }

    fn set_scissor(&self, x: u32, y: u32, width: u32, height: u32) {
        let mut active = self.pass.lock();
        let Some(active) = active.as_mut() else {
            warn!("set_scissor called outside a pass");
            return;
        };
        let (max_w, max_h) = active.target_size;
        let x = x.min(max_w);
        let y = y.min(max_h);
        active
            .pass
            .set_scissor_rect(x, y, width.min(max_w - x), height.min(max_h - y));
    }

    fn bind_texture(&self, texture: &GpuTexture) {
        let bind_group = self.texture_bind_group(texture);
        let mut active = self.pass.lock();
        let Some(active) = active.as_mut() else {
            warn!("bind_texture called outside a pass");
            return;
        };
        active.pass.set_bind_group(0, &bind_group, &[]);
    }

    fn draw(&self, vertex_bytes: &[u8], vertex_count: u32) {
        if vertex_count == 0 {
            return;
        }
        let buffer = self
            .context
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Quad Vertex Buffer"),
                contents: vertex_bytes,
                usage: wgpu::BufferUsages::VERTEX,
            });
        let mut active = self.pass.lock();
        let Some(active) = active.as_mut() else {
            warn!("draw called outside a pass");
            return;
        };
        active.pass.set_vertex_buffer(0, buffer.slice(..));
        active.pass.draw(0..vertex_count, 0..1);
    }

    fn end_pass(&self) {
        let Some(active) = self.pass.lock().take() else {
            warn!("end_pass called without an open pass");
            return;
        };
        drop(active.pass);
        self.context.queue().submit(Some(active.encoder.finish()));
    }
}
