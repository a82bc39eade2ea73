//! Startup-built set of compute and render programs plus the shared quad,
//! uniform buffer and sampler they use.

use super::library::{ShaderError, ShaderLibrary, ValidatedShader, WorkgroupShape};
use super::processor::Uniforms;
use super::GpuContext;
use crate::frame::{QuadVertex, FRAME_FORMAT};
use crate::settings::{ComputeEffect, FragmentEffect, VertexEffect};
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::{info, warn};
use wgpu::util::DeviceExt;

/// Identifies a render program by its vertex and fragment halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub vertex: VertexEffect,
    pub fragment: FragmentEffect,
}

impl RenderKey {
    pub const fn new(vertex: VertexEffect, fragment: FragmentEffect) -> Self {
        Self { vertex, fragment }
    }

    /// Every combination built at startup. Vertex effects are only ever
    /// paired with chromatic aberration; fragment effects with the
    /// pass-through vertex stage.
    pub const REGISTERED: [RenderKey; 7] = [
        RenderKey::new(VertexEffect::Warp, FragmentEffect::ChromaticAberration),
        RenderKey::new(VertexEffect::Wave, FragmentEffect::ChromaticAberration),
        RenderKey::new(VertexEffect::Sine, FragmentEffect::ChromaticAberration),
        RenderKey::new(VertexEffect::None, FragmentEffect::ChromaticAberration),
        RenderKey::new(VertexEffect::None, FragmentEffect::ToneMap),
        RenderKey::new(VertexEffect::None, FragmentEffect::FilmGrain),
        RenderKey::new(VertexEffect::None, FragmentEffect::Vignette),
    ];

    /// Key of the program that should run for a requested pair.
    ///
    /// A selected vertex effect always wins and the fragment choice is
    /// ignored; the fragment effect only matters when no vertex effect is set.
    pub fn resolve(vertex: VertexEffect, fragment: FragmentEffect) -> Option<RenderKey> {
        if vertex != VertexEffect::None {
            Some(RenderKey::new(vertex, FragmentEffect::ChromaticAberration))
        } else if fragment != FragmentEffect::None {
            Some(RenderKey::new(VertexEffect::None, fragment))
        } else {
            None
        }
    }
}

/// A compiled compute program.
pub struct ComputeProgram {
    pub effect: ComputeEffect,
    pub pipeline: wgpu::ComputePipeline,
    /// Workgroup size reported by the compiled module.
    pub workgroup: WorkgroupShape,
}

/// A compiled vertex + fragment program.
pub struct RenderProgram {
    pub key: RenderKey,
    pub pipeline: wgpu::RenderPipeline,
}

/// A program that could not be built and will be treated as pass-through.
#[derive(Debug)]
pub struct ProgramFailure {
    pub program: String,
    pub error: ShaderError,
}

/// Every effect program plus shared GPU resources. Immutable after `new`.
pub struct PipelineRegistry {
    compute: HashMap<ComputeEffect, ComputeProgram>,
    render: HashMap<RenderKey, RenderProgram>,
    compute_layout: wgpu::BindGroupLayout,
    render_layout: wgpu::BindGroupLayout,
    quad_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    failures: Vec<ProgramFailure>,
}

impl PipelineRegistry {
    /// Build every program in `library`. Programs that fail validation are
    /// logged and left out; construction itself never fails.
    pub fn new(ctx: &GpuContext, library: &ShaderLibrary) -> Self {
        let device = &ctx.device;
        let shape = WorkgroupShape::from_limits(&device.limits());
        let mut failures = Vec::new();

        let compute_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Compute Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: FRAME_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let render_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Render Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
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
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let compute_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Compute Pipeline Layout"),
            bind_group_layouts: &[&compute_layout],
            immediate_size: 0,
        });
        let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &[&render_layout],
            immediate_size: 0,
        });

        let mut compute = HashMap::new();
        for effect in ComputeEffect::ALL.into_iter().filter(|e| *e != ComputeEffect::None) {
            let label = format!("Compute {}", effect.label());
            let reflected = library
                .compute(effect, shape)
                .and_then(|shader| shader.workgroup_shape().map(|workgroup| (shader, workgroup)));
            match reflected {
                Ok((shader, workgroup)) => {
                    let module = create_module(device, &label, &shader);
                    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(&label),
                        layout: Some(&compute_pipeline_layout),
                        module: &module,
                        entry_point: Some("cs_main"),
                        compilation_options: Default::default(),
                        cache: None,
                    });
                    compute.insert(
                        effect,
                        ComputeProgram {
                            effect,
                            pipeline,
                            workgroup,
                        },
                    );
                }
                Err(error) => {
                    warn!("{} unavailable: {}", label, error);
                    failures.push(ProgramFailure { program: label, error });
                }
            }
        }

        let mut render = HashMap::new();
        for key in RenderKey::REGISTERED {
            let label = format!("Render {}+{}", key.vertex.label(), key.fragment.label());
            let halves = library.vertex(key.vertex).and_then(|v| library.fragment(key.fragment).map(|f| (v, f)));
            match halves {
                Ok((vertex_shader, fragment_shader)) => {
                    let vertex_module = create_module(device, &format!("{} vertex", label), &vertex_shader);
                    let fragment_module = create_module(device, &format!("{} fragment", label), &fragment_shader);
                    let pipeline = create_render_pipeline(device, &label, &render_pipeline_layout, &vertex_module, &fragment_module);
                    render.insert(key, RenderProgram { key, pipeline });
                }
                Err(error) => {
                    warn!("{} unavailable: {}", label, error);
                    failures.push(ProgramFailure { program: label, error });
                }
            }
        }

        let quad_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Vertex Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Effect Uniform Buffer"),
            contents: bytemuck::bytes_of(&Uniforms::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Effect Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        info!(
            "Pipeline registry ready: {} compute, {} render programs ({} unavailable, workgroup {}x{})",
            compute.len(),
            render.len(),
            failures.len(),
            shape.x,
            shape.y
        );

        Self {
            compute,
            render,
            compute_layout,
            render_layout,
            quad_buffer,
            uniform_buffer,
            sampler,
            failures,
        }
    }

    pub fn lookup_compute(&self, effect: ComputeEffect) -> Option<&ComputeProgram> {
        self.compute.get(&effect)
    }

    /// Program for the requested pair, after applying [`RenderKey::resolve`].
    pub fn lookup_render(&self, vertex: VertexEffect, fragment: FragmentEffect) -> Option<&RenderProgram> {
        RenderKey::resolve(vertex, fragment).and_then(|key| self.render.get(&key))
    }

    /// Programs that failed to build.
    pub fn failures(&self) -> &[ProgramFailure] {
        &self.failures
    }

    pub fn compute_layout(&self) -> &wgpu::BindGroupLayout {
        &self.compute_layout
    }

    pub fn render_layout(&self) -> &wgpu::BindGroupLayout {
        &self.render_layout
    }

    pub fn quad_buffer(&self) -> &wgpu::Buffer {
        &self.quad_buffer
    }

    pub fn uniform_buffer(&self) -> &wgpu::Buffer {
        &self.uniform_buffer
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }
}

fn create_module(device: &wgpu::Device, label: &str, shader: &ValidatedShader) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shader.source.as_str())),
    })
}

fn create_render_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    vertex_module: &wgpu::ShaderModule,
    fragment_module: &wgpu::ShaderModule,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: vertex_module,
            entry_point: Some("vs_main"),
            buffers: &[QuadVertex::layout()],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: fragment_module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: FRAME_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
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
    })
}
