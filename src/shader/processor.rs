//! Runs the selected compute stage and then the selected render stage over
//! one frame.

use super::library::WARP_STRENGTH;
use super::registry::{ComputeProgram, PipelineRegistry, RenderProgram};
use super::{FrameProcessor, GpuContext, ProcessError};
use crate::frame::GpuFrame;
use crate::settings::{ComputeEffect, EffectSelection};
use std::sync::Arc;
use tracing::debug;

/// Uniform block shared by every render program.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Uniforms {
    pub time: f32,
    pub resolution_x: f32,
    pub resolution_y: f32,
    pub warp_strength: f32,
}

impl Uniforms {
    pub fn for_frame(time: f32, width: u32, height: u32) -> Self {
        Self {
            time,
            resolution_x: width as f32,
            resolution_y: height as f32,
            warp_strength: WARP_STRENGTH,
        }
    }
}

/// GPU implementation of [`FrameProcessor`].
///
/// Writes the registry's uniform buffer on every run, so only one run may be
/// in flight at a time; `ProcessingWorker` guarantees that.
pub struct GpuFrameProcessor {
    ctx: GpuContext,
    registry: Arc<PipelineRegistry>,
}

impl GpuFrameProcessor {
    pub fn new(ctx: GpuContext, registry: Arc<PipelineRegistry>) -> Self {
        Self { ctx, registry }
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    fn encode_compute(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        program: &ComputeProgram,
        input: &GpuFrame,
    ) -> Result<GpuFrame, ProcessError> {
        let output = GpuFrame::allocate(
            &self.ctx.device,
            "Compute Output",
            input.width,
            input.height,
            wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
        )?;

        let bind_group = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Compute Bind Group"),
            layout: self.registry.compute_layout(),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&input.view()) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&output.view()) },
            ],
        });

        let (groups_x, groups_y) = program.workgroup.dispatch_size(input.width, input.height);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Compute Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        Ok(output)
    }

    fn encode_render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        program: &RenderProgram,
        input: &GpuFrame,
        time: f32,
    ) -> Result<GpuFrame, ProcessError> {
        let output = GpuFrame::allocate(
            &self.ctx.device,
            "Render Output",
            input.width,
            input.height,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
        )?;

        let uniforms = Uniforms::for_frame(time, input.width, input.height);
        self.ctx
            .queue
            .write_buffer(self.registry.uniform_buffer(), 0, bytemuck::bytes_of(&uniforms));

        let bind_group = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Render Bind Group"),
            layout: self.registry.render_layout(),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&input.view()) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(self.registry.sampler()) },
                wgpu::BindGroupEntry { binding: 2, resource: self.registry.uniform_buffer().as_entire_binding() },
            ],
        });

        let output_view = output.view();
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Effect Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output_view,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::BLACK), store: wgpu::StoreOp::Store },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, self.registry.quad_buffer().slice(..));
            pass.draw(0..4, 0..1);
        }
        Ok(output)
    }
}

impl FrameProcessor for GpuFrameProcessor {
    type Frame = GpuFrame;

    fn process(&mut self, input: &GpuFrame, settings: &EffectSelection) -> Result<GpuFrame, ProcessError> {
        if settings.is_passthrough() {
            return Ok(input.clone());
        }
        GpuFrame::check_allocatable(&self.ctx.device, "effect output", input.width, input.height)?;

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Effect Encoder") });
        let mut current = input.clone();
        let mut encoded = false;

        // Compute always runs before render.
        if settings.compute != ComputeEffect::None {
            match self.registry.lookup_compute(settings.compute) {
                Some(program) => {
                    current = self.encode_compute(&mut encoder, program, &current)?;
                    encoded = true;
                }
                None => debug!("Compute {} unavailable, passing through", settings.compute.label()),
            }
        }

        if settings.wants_render() {
            match self.registry.lookup_render(settings.vertex, settings.fragment) {
                Some(program) => {
                    current = self.encode_render(&mut encoder, program, &current, settings.time)?;
                    encoded = true;
                }
                None => debug!(
                    "Render {}+{} unavailable, passing through",
                    settings.vertex.label(),
                    settings.fragment.label()
                ),
            }
        }

        if !encoded {
            return Ok(current);
        }

        let submission = self.ctx.queue.submit(std::iter::once(encoder.finish()));
        self.ctx
            .device
            .poll(wgpu::PollType::Wait { submission_index: Some(submission), timeout: None })
            .map_err(|e| ProcessError::Device(e.to_string()))?;
        Ok(current)
    }
}
