//! Frame types: CPU frames from the camera, GPU frames flowing through the
//! pipeline, and the full-screen quad vertex layout.

use crate::shader::{GpuContext, ProcessError};
use bytemuck::{Pod, Zeroable};

/// Texture format used for every intermediate and output frame.
pub const FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Supported 8-bit pixel layouts for camera frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// RGB, 24 bits per pixel
    Rgb,
    /// RGBA, 32 bits per pixel
    Rgba,
    /// BGRA, 32 bits per pixel (typical camera sensor output)
    Bgra,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba | PixelFormat::Bgra => 4,
        }
    }
}

/// A CPU-side video frame as delivered by the camera.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Creates a black frame with the given dimensions and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = (width as usize) * (height as usize) * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            data: vec![0; size],
        }
    }

    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    /// True if `data` holds exactly one full image.
    pub fn is_complete(&self) -> bool {
        self.data.len() == (self.width as usize) * (self.height as usize) * self.format.bytes_per_pixel()
    }

    /// Converts this frame to RGBA.
    pub fn to_rgba(&self) -> VideoFrame {
        let pixel_count = (self.width as usize) * (self.height as usize);
        let data = match self.format {
            PixelFormat::Rgba => return self.clone(),
            PixelFormat::Rgb => {
                let mut rgba = Vec::with_capacity(pixel_count * 4);
                for px in self.data.chunks_exact(3) {
                    rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
                rgba
            }
            PixelFormat::Bgra => {
                let mut rgba = self.data.clone();
                for px in rgba.chunks_exact_mut(4) {
                    px.swap(0, 2);
                }
                rgba
            }
        };

        VideoFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgba,
            data,
        }
    }
}

/// A frame living on the GPU.
///
/// Cloning shares the underlying texture; it is released when the last
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct GpuFrame {
    pub texture: wgpu::Texture,
    pub width: u32,
    pub height: u32,
}

impl GpuFrame {
    pub fn new(texture: wgpu::Texture) -> Self {
        let (width, height) = (texture.width(), texture.height());
        Self { texture, width, height }
    }

    pub fn view(&self) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    /// Check that a `width` x `height` frame texture can be allocated on `device`.
    pub fn check_allocatable(device: &wgpu::Device, what: &'static str, width: u32, height: u32) -> Result<(), ProcessError> {
        let max = device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(ProcessError::Allocation { what, width, height });
        }
        Ok(())
    }

    /// Allocate an uninitialised frame texture.
    pub fn allocate(
        device: &wgpu::Device,
        label: &'static str,
        width: u32,
        height: u32,
        usage: wgpu::TextureUsages,
    ) -> Result<Self, ProcessError> {
        Self::check_allocatable(device, label, width, height)?;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FRAME_FORMAT,
            usage,
            view_formats: &[],
        });
        Ok(Self::new(texture))
    }

    /// Upload a camera frame, converting it to RGBA on the way.
    pub fn upload(ctx: &GpuContext, frame: &VideoFrame) -> Result<Self, ProcessError> {
        if !frame.is_complete() {
            return Err(ProcessError::Allocation {
                what: "input frame (short buffer)",
                width: frame.width,
                height: frame.height,
            });
        }
        let rgba = frame.to_rgba();
        let gpu = Self::allocate(
            &ctx.device,
            "Input Frame",
            rgba.width,
            rgba.height,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
        )?;

        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &rgba.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(rgba.width * 4),
                rows_per_image: Some(rgba.height),
            },
            wgpu::Extent3d {
                width: rgba.width,
                height: rgba.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(gpu)
    }

    /// Copy the frame back to the CPU as tightly packed RGBA rows.
    ///
    /// Blocks until the GPU is done; meant for snapshots and tests, never for
    /// the per-frame path.
    pub fn read_rgba(&self, ctx: &GpuContext) -> Result<VideoFrame, ProcessError> {
        let unpadded = self.width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded * self.height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        let submission = ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        ctx.device
            .poll(wgpu::PollType::Wait { submission_index: Some(submission), timeout: None })
            .map_err(|e| ProcessError::Device(e.to_string()))?;
        receiver
            .recv()
            .map_err(|e| ProcessError::Device(e.to_string()))?
            .map_err(|e| ProcessError::Device(e.to_string()))?;

        let mapped = slice.get_mapped_range();
        let mut data = Vec::with_capacity((unpadded * self.height) as usize);
        for row in mapped.chunks(padded as usize) {
            data.extend_from_slice(&row[..unpadded as usize]);
        }
        drop(mapped);
        buffer.unmap();

        Ok(VideoFrame::from_data(self.width, self.height, PixelFormat::Rgba, data))
    }
}

/// Vertex of the full-screen quad shared by every render program.
///
/// The layout is fixed: `vec4<f32>` position then `vec2<f32>` texture
/// coordinate, 24-byte stride.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 4],
    pub tex_coords: [f32; 2],
}

impl QuadVertex {
    /// Triangle-strip order: bottom-left, bottom-right, top-left, top-right.
    pub const VERTICES: &'static [QuadVertex] = &[
        QuadVertex { position: [-1.0, -1.0, 0.0, 1.0], tex_coords: [0.0, 1.0] },
        QuadVertex { position: [1.0, -1.0, 0.0, 1.0], tex_coords: [1.0, 1.0] },
        QuadVertex { position: [-1.0, 1.0, 0.0, 1.0], tex_coords: [0.0, 0.0] },
        QuadVertex { position: [1.0, 1.0, 0.0, 1.0], tex_coords: [1.0, 0.0] },
    ];

    pub const STRIDE: wgpu::BufferAddress = std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress;

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: Self::STRIDE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}
