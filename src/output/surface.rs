//! Window surface target: blits processed frames 1:1 onto the swapchain.

use super::{blit_extent, PresentTarget};
use crate::frame::GpuFrame;
use crate::shader::GpuContext;
use anyhow::{anyhow, Result};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::window::Window;

/// Full-screen triangle that copies texels without filtering.
const BLIT_SHADER: &str = r#"
@group(0) @binding(0) var t_frame: texture_2d<f32>;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32((index << 1u) & 2u) * 2.0 - 1.0;
    let y = f32(index & 2u) * 2.0 - 1.0;
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    return textureLoad(t_frame, vec2<i32>(pos.xy), 0);
}
"#;

pub struct SurfacePresenter {
    ctx: GpuContext,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    window: Arc<Window>,
}

impl SurfacePresenter {
    pub fn new(ctx: GpuContext, surface: wgpu::Surface<'static>, window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();
        let caps = surface.get_capabilities(&ctx.adapter);
        // Camera bytes are already display-encoded, so avoid a second sRGB encode.
        let format = caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first())
            .copied()
            .ok_or_else(|| anyhow!("surface reports no supported formats"))?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&ctx.device, &config);
        info!("Surface configured as {:?} {}x{}", format, config.width, config.height);

        let module = ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(BLIT_SHADER)),
        });

        let bind_group_layout = ctx.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });

        let pipeline_layout = ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blit Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = ctx.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Blit Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        Ok(Self {
            ctx,
            surface,
            config,
            pipeline,
            bind_group_layout,
            window,
        })
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.ctx.device, &self.config);
        }
    }
}

/// Lost and outdated swapchains recover after a reconfigure; the frame is still missed.
fn needs_reconfigure(err: &wgpu::SurfaceError) -> bool {
    matches!(err, wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)
}

impl PresentTarget for SurfacePresenter {
    type Frame = GpuFrame;

    fn present(&mut self, frame: &GpuFrame) -> Result<()> {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(e) if needs_reconfigure(&e) => {
                debug!("Surface {:?}, reconfiguring", e);
                self.surface.configure(&self.ctx.device, &self.config);
                return Err(anyhow!("surface {:?}, frame not shown", e));
            }
            Err(e) => return Err(e.into()),
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let (width, height) = blit_extent((frame.width, frame.height), (self.config.width, self.config.height));

        let frame_view = frame.view();
        let bind_group = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blit Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&frame_view),
            }],
        });

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Blit Encoder") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Blit Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_scissor_rect(0, 0, width, height);
            pass.draw(0..3, 0..1);
        }

        // Submitted but not awaited; the swapchain paces us.
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        self.window.pre_present_notify();
        output.present();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_stale_swapchains_reconfigure() {
        assert!(needs_reconfigure(&wgpu::SurfaceError::Lost));
        assert!(needs_reconfigure(&wgpu::SurfaceError::Outdated));
        assert!(!needs_reconfigure(&wgpu::SurfaceError::Timeout));
        assert!(!needs_reconfigure(&wgpu::SurfaceError::OutOfMemory));
    }
}
