//! The render graph: pipelines, geometry buffers, and the per-frame pass.
//!
//! A [`Scene`] is built for one source (an image pair or a point cloud) and
//! survives until the next upload. Almost every configuration change flows
//! through the uniform buffer; only the fields named by
//! [`ChangeSet::FIELDS_TRAIL_GEOMETRY`] and `FIELDS_SUBSAMPLE` force buffer
//! rebuilds, which the viewer coalesces to at most one per frame.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::config::SimulationConfig;
use crate::error::GpuError;
use crate::gpu::{GpuState, DEPTH_FORMAT};
use crate::shaders::{head_shader, line_trail_shader, ribbon_trail_shader, ShaderMode};
use crate::trails::{head_vertices, HeadVertex, TrailGeometry, TrailParticle, TrailStyle, TrailVertex};

/// Uniform block shared by every pipeline. Layout mirrors the `Uniforms`
/// struct in the shader module; both must change together.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct SceneUniforms {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub time: f32,
    pub point_size: f32,
    pub trail_thickness: f32,
    pub trail_length: f32,
    pub noise_amplitude: f32,
    pub noise_speed: f32,
    pub noise_scale: f32,
    pub noise_blend: f32,
    pub displacement_scale: f32,
    pub time_randomization: f32,
    pub time_randomization_scale: f32,
    pub use_vertex_colors: f32,
    pub particle_color: [f32; 3],
    pub _pad0: f32,
    pub viewport: [f32; 2],
    pub _pad1: [f32; 2],
}

impl SceneUniforms {
    /// Snapshot the uniform block from the camera and configuration.
    pub fn build(
        view: Mat4,
        proj: Mat4,
        config: &SimulationConfig,
        time: f32,
        viewport: [f32; 2],
        use_vertex_colors: bool,
    ) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            time,
            point_size: config.point_size,
            trail_thickness: config.trail_thickness,
            trail_length: config.trail_length,
            noise_amplitude: config.noise_amplitude,
            noise_speed: config.noise_speed,
            noise_scale: config.noise_scale,
            noise_blend: config.noise_blend,
            displacement_scale: config.displacement_scale,
            time_randomization: config.time_randomization,
            time_randomization_scale: config.time_randomization_scale,
            use_vertex_colors: if use_vertex_colors { 1.0 } else { 0.0 },
            particle_color: config.particle_color,
            _pad0: 0.0,
            viewport,
            _pad1: [0.0; 2],
        }
    }
}

/// What feeds the scene's shaders.
pub enum SceneSource {
    /// Color and monocular-depth images sampled on the particle lattice.
    Image {
        color: image::RgbaImage,
        depth: image::RgbaImage,
    },
    /// A conditioned point cloud; `has_colors` selects the vertex-color mix.
    Cloud { has_colors: bool },
}

struct TrailBuffers {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    style: TrailStyle,
}

pub struct Scene {
    mode: ShaderMode,
    use_vertex_colors: bool,

    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    texture_bind_group: Option<wgpu::BindGroup>,

    head_pipeline: wgpu::RenderPipeline,
    line_pipeline: wgpu::RenderPipeline,
    ribbon_pipeline: wgpu::RenderPipeline,

    head_buffer: wgpu::Buffer,
    head_count: u32,

    /// None after an out-of-memory fallback: heads keep rendering.
    trails: Option<TrailBuffers>,
}

impl Scene {
    pub fn new(
        gpu: &GpuState,
        source: &SceneSource,
        particles: &[TrailParticle],
        config: &SimulationConfig,
    ) -> Result<Self, GpuError> {
        let device = &gpu.device;
        let (mode, use_vertex_colors) = match source {
            SceneSource::Image { .. } => (ShaderMode::Image, false),
            SceneSource::Cloud { has_colors } => (ShaderMode::Cloud, *has_colors),
        };

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Scene Uniform Buffer"),
            size: std::mem::size_of::<SceneUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Uniform Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Uniform Bind Group"),
            layout: &uniform_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let (texture_bind_group_layout, texture_bind_group) = match source {
            SceneSource::Image { color, depth } => {
                let layout = create_texture_bind_group_layout(device);
                let bind_group = create_texture_bind_group(gpu, &layout, color, depth);
                (Some(layout), Some(bind_group))
            }
            SceneSource::Cloud { .. } => (None, None),
        };

        let mut bind_group_layouts = vec![&uniform_bind_group_layout];
        if let Some(ref layout) = texture_bind_group_layout {
            bind_group_layouts.push(layout);
        }

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Scene Pipeline Layout"),
            bind_group_layouts: &bind_group_layouts,
            push_constant_ranges: &[],
        });

        let head_pipeline = create_pipeline(
            gpu,
            &pipeline_layout,
            "Head Pipeline",
            &head_shader(mode),
            head_vertex_layout(),
            wgpu::PrimitiveTopology::TriangleList,
            true,
        );
        let line_pipeline = create_pipeline(
            gpu,
            &pipeline_layout,
            "Line Trail Pipeline",
            &line_trail_shader(mode),
            trail_vertex_layout(),
            wgpu::PrimitiveTopology::LineList,
            false,
        );
        let ribbon_pipeline = create_pipeline(
            gpu,
            &pipeline_layout,
            "Ribbon Trail Pipeline",
            &ribbon_trail_shader(mode),
            trail_vertex_layout(),
            wgpu::PrimitiveTopology::TriangleList,
            false,
        );

        let mut scene = Self {
            mode,
            use_vertex_colors,
            uniform_buffer,
            uniform_bind_group,
            texture_bind_group,
            head_pipeline,
            line_pipeline,
            ribbon_pipeline,
            head_buffer: create_head_buffer(device, particles)?,
            head_count: particles.len() as u32,
            trails: None,
        };
        scene.rebuild_trails(gpu, particles, config);
        Ok(scene)
    }

    pub fn mode(&self) -> ShaderMode {
        self.mode
    }

    /// Whether the out-of-memory fallback has dropped trail buffers.
    pub fn head_only(&self) -> bool {
        self.trails.is_none()
    }

    /// Replace head and trail buffers for a new particle set.
    pub fn rebuild_geometry(
        &mut self,
        gpu: &GpuState,
        particles: &[TrailParticle],
        config: &SimulationConfig,
    ) -> Result<(), GpuError> {
        self.head_buffer = create_head_buffer(&gpu.device, particles)?;
        self.head_count = particles.len() as u32;
        self.rebuild_trails(gpu, particles, config);
        Ok(())
    }

    /// Build trail buffers under an out-of-memory error scope. On failure
    /// the scene keeps rendering heads and logs once.
    fn rebuild_trails(
        &mut self,
        gpu: &GpuState,
        particles: &[TrailParticle],
        config: &SimulationConfig,
    ) {
        let style = if config.use_real_trail_thickness {
            TrailStyle::Ribbon
        } else {
            TrailStyle::Line
        };
        let geometry = TrailGeometry::build(style, particles);

        gpu.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let vertex_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Trail Vertex Buffer"),
                contents: bytemuck::cast_slice(&geometry.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Trail Index Buffer"),
                contents: bytemuck::cast_slice(&geometry.indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        let _ = gpu.device.poll(wgpu::PollType::Wait);
        if let Some(error) = pollster::block_on(gpu.device.pop_error_scope()) {
            log::warn!(
                "trail buffer allocation failed, rendering heads only: {error}"
            );
            self.trails = None;
            return;
        }

        self.trails = Some(TrailBuffers {
            vertex_buffer,
            index_buffer,
            index_count: geometry.indices.len() as u32,
            style,
        });
    }

    /// Upload this frame's uniform snapshot.
    pub fn update_uniforms(&self, gpu: &GpuState, config: &SimulationConfig, time: f32) {
        let uniforms = SceneUniforms::build(
            gpu.camera.view_matrix(),
            gpu.projection_matrix(),
            config,
            time,
            [gpu.config.width as f32, gpu.config.height as f32],
            self.use_vertex_colors,
        );
        gpu.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
    }

    /// Record and submit the frame.
    ///
    /// Trails draw only when `trail_thickness > 0` and the buffers survived
    /// allocation; heads draw only when `point_size > 0`.
    pub fn render(
        &self,
        gpu: &GpuState,
        config: &SimulationConfig,
        time: f32,
    ) -> Result<(), wgpu::SurfaceError> {
        self.update_uniforms(gpu, config, time);

        let output = gpu.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.02,
                            g: 0.02,
                            b: 0.05,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &gpu.depth_texture,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);
            if let Some(ref textures) = self.texture_bind_group {
                render_pass.set_bind_group(1, textures, &[]);
            }

            if config.trail_thickness > 0.0 {
                if let Some(ref trails) = self.trails {
                    let pipeline = match trails.style {
                        TrailStyle::Line => &self.line_pipeline,
                        TrailStyle::Ribbon => &self.ribbon_pipeline,
                    };
                    render_pass.set_pipeline(pipeline);
                    render_pass.set_vertex_buffer(0, trails.vertex_buffer.slice(..));
                    render_pass
                        .set_index_buffer(trails.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    render_pass.draw_indexed(0..trails.index_count, 0, 0..1);
                }
            }

            if config.point_size > 0.0 {
                render_pass.set_pipeline(&self.head_pipeline);
                render_pass.set_vertex_buffer(0, self.head_buffer.slice(..));
                render_pass.draw(0..6, 0..self.head_count);
            }
        }

        gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}

fn create_head_buffer(
    device: &wgpu::Device,
    particles: &[TrailParticle],
) -> Result<wgpu::Buffer, GpuError> {
    let heads = head_vertices(particles);
    if heads.is_empty() {
        return Err(GpuError::ResourceFailed("empty particle set".into()));
    }
    Ok(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Head Vertex Buffer"),
        contents: bytemuck::cast_slice(&heads),
        usage: wgpu::BufferUsages::VERTEX,
    }))
}

const HEAD_ATTRIBUTES: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x2,
];

const TRAIL_ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x2,
    3 => Float32,
    4 => Float32,
];

fn head_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<HeadVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Instance,
        attributes: &HEAD_ATTRIBUTES,
    }
}

fn trail_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<TrailVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &TRAIL_ATTRIBUTES,
    }
}

fn create_pipeline(
    gpu: &GpuState,
    layout: &wgpu::PipelineLayout,
    label: &str,
    shader_src: &str,
    vertex_layout: wgpu::VertexBufferLayout<'_>,
    topology: wgpu::PrimitiveTopology,
    depth_write: bool,
) -> wgpu::RenderPipeline {
    let shader = gpu
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

    gpu.device
        .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: gpu.config.format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: depth_write,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
}

fn create_texture_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    };
    let sampler_entry = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    };

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Texture Bind Group Layout"),
        entries: &[
            texture_entry(0),
            sampler_entry(1),
            texture_entry(2),
            sampler_entry(3),
        ],
    })
}

const COLOR_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
/// Depth maps hold linear data; an sRGB format would gamma-decode the
/// stored bytes before the luminance dot and bend the lift curve.
const DEPTH_MAP_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

fn create_texture_bind_group(
    gpu: &GpuState,
    layout: &wgpu::BindGroupLayout,
    color: &image::RgbaImage,
    depth: &image::RgbaImage,
) -> wgpu::BindGroup {
    let color_view = upload_texture(gpu, "Color Texture", color, COLOR_TEXTURE_FORMAT);
    let depth_view = upload_texture(gpu, "Depth Map Texture", depth, DEPTH_MAP_FORMAT);

    let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Image Sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    });

    gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Texture Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&color_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&sampler),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(&depth_view),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::Sampler(&sampler),
            },
        ],
    })
}

fn upload_texture(
    gpu: &GpuState,
    label: &str,
    img: &image::RgbaImage,
    format: wgpu::TextureFormat,
) -> wgpu::TextureView {
    let size = wgpu::Extent3d {
        width: img.width(),
        height: img.height(),
        depth_or_array_layers: 1,
    };
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    gpu.queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        img.as_raw(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * img.width()),
            rows_per_image: Some(img.height()),
        },
        size,
    );

    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;

    #[test]
    fn uniform_block_is_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<SceneUniforms>(), 208);
        assert_eq!(std::mem::size_of::<SceneUniforms>() % 16, 0);
    }

    #[test]
    fn uniform_snapshot_carries_the_config() {
        let mut config = SimulationConfig::default();
        config.point_size = 1.25;
        config.noise_blend = 0.4;

        let u = SceneUniforms::build(
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            &config,
            3.5,
            [800.0, 600.0],
            true,
        );
        assert_eq!(u.time, 3.5);
        assert_eq!(u.point_size, 1.25);
        assert_eq!(u.noise_blend, 0.4);
        assert_eq!(u.use_vertex_colors, 1.0);
        assert_eq!(u.viewport, [800.0, 600.0]);
        assert_eq!(u.particle_color, [0.0, 1.0, 1.0]);
    }

    #[test]
    fn depth_maps_upload_without_gamma_decoding() {
        assert!(COLOR_TEXTURE_FORMAT.is_srgb());
        assert!(!DEPTH_MAP_FORMAT.is_srgb());
        assert_eq!(DEPTH_MAP_FORMAT, wgpu::TextureFormat::Rgba8Unorm);
    }

    #[test]
    fn vertex_layout_strides_match_the_pod_types() {
        assert_eq!(std::mem::size_of::<TrailVertex>(), 40);
        assert_eq!(std::mem::size_of::<HeadVertex>(), 32);
        assert_eq!(
            trail_vertex_layout().array_stride,
            std::mem::size_of::<TrailVertex>() as u64
        );
        assert_eq!(
            head_vertex_layout().array_stride,
            std::mem::size_of::<HeadVertex>() as u64
        );
    }
}
