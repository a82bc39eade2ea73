//! GPU effect programs and the frame processor that chains them.

mod gpu_context;
mod library;
mod processor;
mod registry;

pub use gpu_context::{GpuContext, GpuInitError};
pub use library::{validate_wgsl, ShaderError, ShaderLibrary, ValidatedShader, WorkgroupShape, WARP_STRENGTH};
pub use processor::{GpuFrameProcessor, Uniforms};
pub use registry::{ComputeProgram, ProgramFailure, PipelineRegistry, RenderKey, RenderProgram};

use crate::settings::EffectSelection;
use thiserror::Error;

/// Reasons a single processing run is abandoned. None of them are fatal.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("cannot allocate {what} ({width}x{height})")]
    Allocation {
        what: &'static str,
        width: u32,
        height: u32,
    },
    #[error("GPU device error: {0}")]
    Device(String),
}

/// Turns one input frame into one output frame.
pub trait FrameProcessor {
    type Frame;

    /// Run the effect chain selected in `settings` over `input`.
    fn process(&mut self, input: &Self::Frame, settings: &EffectSelection) -> Result<Self::Frame, ProcessError>;
}
