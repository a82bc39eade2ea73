//! End-to-end checks against a real (headless) GPU device.
//!
//! Each test returns early when the machine has no usable adapter.

use lumen::frame::{GpuFrame, PixelFormat, VideoFrame};
use lumen::handoff::HandoffSlot;
use lumen::settings::{ComputeEffect, EffectSelection, FragmentEffect, SettingsStore, VertexEffect};
use lumen::shader::{FrameProcessor, GpuContext, GpuFrameProcessor, PipelineRegistry, ProcessError, RenderKey, ShaderLibrary};
use lumen::worker::{ProcessingWorker, Submission};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TOLERANCE: u8 = 3;

fn gpu() -> Option<GpuContext> {
    match GpuContext::headless() {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping GPU test: {}", e);
            None
        }
    }
}

fn noise_frame(width: u32, height: u32, seed: u64) -> VideoFrame {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..width * height * 4).map(|_| rng.random::<u8>()).collect();
    VideoFrame::from_data(width, height, PixelFormat::Rgba, data)
}

fn processor(ctx: &GpuContext, library: &ShaderLibrary) -> GpuFrameProcessor {
    let registry = Arc::new(PipelineRegistry::new(ctx, library));
    GpuFrameProcessor::new(ctx.clone(), registry)
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// CPU version of grayscale followed by vignette.
fn grayscale_vignette_reference(input: &VideoFrame) -> Vec<u8> {
    let (w, h) = (input.width as usize, input.height as usize);
    let mut out = Vec::with_capacity(input.data.len());
    for (i, px) in input.data.chunks_exact(4).enumerate() {
        let (x, y) = (i % w, i / w);
        let [r, g, b] = [px[0], px[1], px[2]].map(|c| c as f32 / 255.0);
        let luma = (0.299 * r + 0.587 * g + 0.114 * b) * 255.0;
        let gray = luma.round();

        let u = (x as f32 + 0.5) / w as f32 - 0.5;
        let v = (y as f32 + 0.5) / h as f32 - 0.5;
        let factor = 1.0 - smoothstep(0.3, 0.75, (u * u + v * v).sqrt());
        let shaded = (gray * factor).round().clamp(0.0, 255.0) as u8;
        out.extend_from_slice(&[shaded, shaded, shaded, px[3]]);
    }
    out
}

fn assert_close(actual: &[u8], expected: &[u8], width: u32) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let pixel = i / 4;
        assert!(
            a.abs_diff(*e) <= TOLERANCE,
            "channel {} of pixel ({}, {}): got {}, expected {}",
            i % 4,
            pixel % width as usize,
            pixel / width as usize,
            a,
            e
        );
    }
}

#[test]
fn test_no_effects_is_identity() {
    let Some(ctx) = gpu() else { return };
    let mut processor = processor(&ctx, &ShaderLibrary::builtin());

    let input = noise_frame(37, 21, 1);
    let gpu_input = GpuFrame::upload(&ctx, &input).unwrap();
    let output = processor.process(&gpu_input, &EffectSelection::default()).unwrap();

    assert_eq!(output.read_rgba(&ctx).unwrap().data, input.data);
}

#[test]
fn test_grayscale_then_vignette_matches_reference() {
    let Some(ctx) = gpu() else { return };
    let mut processor = processor(&ctx, &ShaderLibrary::builtin());

    let input = noise_frame(64, 48, 2);
    let gpu_input = GpuFrame::upload(&ctx, &input).unwrap();
    let settings = EffectSelection::new(ComputeEffect::Grayscale, VertexEffect::None, FragmentEffect::Vignette);
    let output = processor.process(&gpu_input, &settings).unwrap();

    assert_eq!((output.width, output.height), (64, 48));
    let pixels = output.read_rgba(&ctx).unwrap();
    assert_close(&pixels.data, &grayscale_vignette_reference(&input), 64);
}

#[test]
fn test_grayscale_alone_covers_partial_workgroups() {
    let Some(ctx) = gpu() else { return };
    let mut processor = processor(&ctx, &ShaderLibrary::builtin());

    // Not a multiple of any workgroup shape.
    let input = noise_frame(67, 13, 3);
    let gpu_input = GpuFrame::upload(&ctx, &input).unwrap();
    let settings = EffectSelection::default().with_compute(ComputeEffect::Grayscale);
    let pixels = processor.process(&gpu_input, &settings).unwrap().read_rgba(&ctx).unwrap();

    for (out, src) in pixels.data.chunks_exact(4).zip(input.data.chunks_exact(4)) {
        let luma = 0.299 * src[0] as f32 + 0.587 * src[1] as f32 + 0.114 * src[2] as f32;
        let expected = luma.round() as u8;
        assert!(out[0].abs_diff(expected) <= TOLERANCE);
        assert_eq!(out[0], out[1]);
        assert_eq!(out[1], out[2]);
        assert_eq!(out[3], src[3]);
    }
}

#[test]
fn test_vertex_effect_selects_chromatic_program() {
    let Some(ctx) = gpu() else { return };
    let registry = PipelineRegistry::new(&ctx, &ShaderLibrary::builtin());
    assert!(registry.failures().is_empty(), "{:?}", registry.failures());

    for vertex in [VertexEffect::Warp, VertexEffect::Wave, VertexEffect::Sine] {
        for fragment in FragmentEffect::ALL {
            let program = registry.lookup_render(vertex, fragment).unwrap();
            assert_eq!(program.key, RenderKey::new(vertex, FragmentEffect::ChromaticAberration));
        }
    }
    let program = registry.lookup_render(VertexEffect::None, FragmentEffect::ToneMap).unwrap();
    assert_eq!(program.key, RenderKey::new(VertexEffect::None, FragmentEffect::ToneMap));
    assert!(registry.lookup_render(VertexEffect::None, FragmentEffect::None).is_none());
}

#[test]
fn test_every_effect_combination_produces_a_frame() {
    let Some(ctx) = gpu() else { return };
    let mut processor = processor(&ctx, &ShaderLibrary::builtin());
    let gpu_input = GpuFrame::upload(&ctx, &noise_frame(40, 30, 4)).unwrap();

    for compute in ComputeEffect::ALL {
        for vertex in VertexEffect::ALL {
            for fragment in FragmentEffect::ALL {
                let settings = EffectSelection {
                    compute,
                    vertex,
                    fragment,
                    time: 1.25,
                };
                let output = processor.process(&gpu_input, &settings).unwrap();
                assert_eq!((output.width, output.height), (40, 30), "{}", settings);
            }
        }
    }
}

#[test]
fn test_broken_program_degrades_to_passthrough() {
    let Some(ctx) = gpu() else { return };
    let library = ShaderLibrary::builtin().with_compute(ComputeEffect::Grayscale, "fn cs_main( {");
    let mut processor = processor(&ctx, &library);

    let failures = processor.registry().failures();
    assert_eq!(failures.len(), 1);
    assert!(processor.registry().lookup_compute(ComputeEffect::Grayscale).is_none());
    assert!(processor.registry().lookup_compute(ComputeEffect::Blur).is_some());

    let input = noise_frame(16, 16, 5);
    let gpu_input = GpuFrame::upload(&ctx, &input).unwrap();
    let settings = EffectSelection::default().with_compute(ComputeEffect::Grayscale);
    let output = processor.process(&gpu_input, &settings).unwrap();
    assert_eq!(output.read_rgba(&ctx).unwrap().data, input.data);
}

#[test]
fn test_broken_render_program_keeps_compute_output() {
    let Some(ctx) = gpu() else { return };
    let library = ShaderLibrary::builtin()
        .with_fragment(FragmentEffect::Vignette, "fn fs_main( {")
        .with_vertex(VertexEffect::Warp, "@vertex fn vs_main( {");
    let mut processor = processor(&ctx, &library);

    let registry = processor.registry();
    let mut failed: Vec<_> = registry.failures().iter().map(|f| f.program.as_str()).collect();
    failed.sort();
    assert_eq!(failed, ["Render None+Vignette", "Render Warp+Chroma"]);
    assert!(registry.lookup_render(VertexEffect::None, FragmentEffect::Vignette).is_none());
    assert!(registry.lookup_render(VertexEffect::Warp, FragmentEffect::ToneMap).is_none());
    assert!(registry.lookup_render(VertexEffect::Wave, FragmentEffect::Vignette).is_some());

    // The render stage passes through, so the frame is the grayscale kernel's output.
    let input = noise_frame(16, 16, 7);
    let gpu_input = GpuFrame::upload(&ctx, &input).unwrap();
    let settings = EffectSelection::new(ComputeEffect::Grayscale, VertexEffect::None, FragmentEffect::Vignette);
    let pixels = processor.process(&gpu_input, &settings).unwrap().read_rgba(&ctx).unwrap();

    for (out, src) in pixels.data.chunks_exact(4).zip(input.data.chunks_exact(4)) {
        let luma = 0.299 * src[0] as f32 + 0.587 * src[1] as f32 + 0.114 * src[2] as f32;
        assert!(out[0].abs_diff(luma.round() as u8) <= TOLERANCE);
        assert_eq!(out[0], out[1]);
        assert_eq!(out[1], out[2]);
        assert_eq!(out[3], src[3]);
    }
}

#[test]
fn test_oversized_frame_is_rejected_before_encoding() {
    let Some(ctx) = gpu() else { return };
    let max = ctx.device.limits().max_texture_dimension_2d;
    let err = GpuFrame::check_allocatable(&ctx.device, "effect output", max + 1, 1).unwrap_err();
    assert!(matches!(err, ProcessError::Allocation { width, .. } if width == max + 1));
    assert!(GpuFrame::check_allocatable(&ctx.device, "effect output", 0, 10).is_err());
    assert!(GpuFrame::check_allocatable(&ctx.device, "effect output", 64, 48).is_ok());
}

#[test]
fn test_worker_publishes_processed_frame() {
    let Some(ctx) = gpu() else { return };
    let settings = Arc::new(SettingsStore::new(EffectSelection::new(
        ComputeEffect::Blur,
        VertexEffect::None,
        FragmentEffect::None,
    )));
    let slot = Arc::new(HandoffSlot::new());
    let worker = ProcessingWorker::spawn(processor(&ctx, &ShaderLibrary::builtin()), settings, slot.clone()).unwrap();

    let input = GpuFrame::upload(&ctx, &noise_frame(32, 32, 6)).unwrap();
    assert_eq!(worker.submit(input), Submission::Accepted);

    let deadline = Instant::now() + Duration::from_secs(10);
    let frame = loop {
        if let Some(frame) = slot.take_latest() {
            break frame;
        }
        assert!(Instant::now() < deadline, "worker never published");
        std::thread::sleep(Duration::from_millis(5));
    };
    assert_eq!((frame.width, frame.height), (32, 32));

    // Counters are updated just after publishing.
    while worker.is_busy() {
        assert!(Instant::now() < deadline, "worker never went idle");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(worker.stats().completed, 1);
}
