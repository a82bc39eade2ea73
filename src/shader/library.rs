//! WGSL sources for every effect program, plus naga-based validation.

use crate::settings::{ComputeEffect, FragmentEffect, VertexEffect};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use std::collections::HashMap;
use thiserror::Error;

/// Strength passed to the vertex warps through the uniform block.
pub const WARP_STRENGTH: f32 = 0.3;

/// Preferred number of invocations along x in a compute workgroup.
const EXECUTION_WIDTH: u32 = 32;

/// Declarations shared by every vertex and fragment module of a render program.
const RENDER_PRELUDE: &str = r#"
struct Uniforms {
    time: f32,
    resolution_x: f32,
    resolution_y: f32,
    warp_strength: f32,
}

struct VertexInput {
    @location(0) position: vec4<f32>,
    @location(1) tex_coords: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coords: vec2<f32>,
}

@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var s_input: sampler;
@group(0) @binding(2) var<uniform> u: Uniforms;
"#;

const VERTEX_PASSTHROUGH: &str = r#"
@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = in.position;
    out.tex_coords = in.tex_coords;
    return out;
}
"#;

const VERTEX_WARP: &str = r#"
@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let p = in.position.xy;
    let pull = 1.0 - u.warp_strength * 0.3 * (0.5 + 0.5 * sin(u.time * 1.5 + length(p)));
    out.clip_position = vec4<f32>(p * pull, in.position.zw);
    out.tex_coords = in.tex_coords;
    return out;
}
"#;

const VERTEX_WAVE: &str = r#"
@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    var p = in.position.xy;
    p.y = p.y + u.warp_strength * 0.2 * sin(u.time * 2.0 + p.x * 3.0);
    out.clip_position = vec4<f32>(p, in.position.zw);
    out.tex_coords = in.tex_coords;
    return out;
}
"#;

const VERTEX_SINE: &str = r#"
@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    var p = in.position.xy;
    p.x = p.x + u.warp_strength * 0.2 * sin(u.time * 3.0 + p.y * 4.0);
    out.clip_position = vec4<f32>(p, in.position.zw);
    out.tex_coords = in.tex_coords;
    return out;
}
"#;

const FRAGMENT_CHROMATIC_ABERRATION: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let uv = in.tex_coords;
    let offset = (uv - vec2<f32>(0.5)) * (0.01 + 0.005 * sin(u.time));
    let r = textureSample(t_input, s_input, uv + offset).r;
    let g = textureSample(t_input, s_input, uv);
    let b = textureSample(t_input, s_input, uv - offset).b;
    return vec4<f32>(r, g.g, b, g.a);
}
"#;

const FRAGMENT_TONE_MAP: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let c = textureSample(t_input, s_input, in.tex_coords);
    let exposure = 1.6;
    let mapped = vec3<f32>(1.0) - exp(-c.rgb * exposure);
    return vec4<f32>(mapped, c.a);
}
"#;

const FRAGMENT_FILM_GRAIN: &str = r#"
fn hash(p: vec2<f32>) -> f32 {
    return fract(sin(dot(p, vec2<f32>(12.9898, 78.233))) * 43758.5453);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let c = textureSample(t_input, s_input, in.tex_coords);
    let pixel = floor(in.tex_coords * vec2<f32>(u.resolution_x, u.resolution_y));
    let noise = hash(pixel + vec2<f32>(fract(u.time) * 100.0)) - 0.5;
    return vec4<f32>(clamp(c.rgb + vec3<f32>(noise * 0.12), vec3<f32>(0.0), vec3<f32>(1.0)), c.a);
}
"#;

const FRAGMENT_VIGNETTE: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let c = textureSample(t_input, s_input, in.tex_coords);
    let d = length(in.tex_coords - vec2<f32>(0.5));
    let v = 1.0 - smoothstep(0.3, 0.75, d);
    return vec4<f32>(c.rgb * v, c.a);
}
"#;

/// Declarations shared by every compute module. `WG_X`/`WG_Y` are prepended
/// per device.
const COMPUTE_PRELUDE: &str = r#"
@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var t_output: texture_storage_2d<rgba8unorm, write>;

fn luma(c: vec3<f32>) -> f32 {
    return dot(c, vec3<f32>(0.299, 0.587, 0.114));
}

fn load_clamped(p: vec2<i32>, dims: vec2<i32>) -> vec4<f32> {
    return textureLoad(t_input, clamp(p, vec2<i32>(0), dims - vec2<i32>(1)), 0);
}
"#;

const COMPUTE_GRAYSCALE: &str = r#"
@compute @workgroup_size(WG_X, WG_Y, 1)
fn cs_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = textureDimensions(t_input);
    if (gid.x >= dims.x || gid.y >= dims.y) {
        return;
    }
    let c = textureLoad(t_input, vec2<i32>(gid.xy), 0);
    let l = luma(c.rgb);
    textureStore(t_output, vec2<i32>(gid.xy), vec4<f32>(l, l, l, c.a));
}
"#;

const COMPUTE_BLUR: &str = r#"
@compute @workgroup_size(WG_X, WG_Y, 1)
fn cs_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = vec2<i32>(textureDimensions(t_input));
    let p = vec2<i32>(gid.xy);
    if (p.x >= dims.x || p.y >= dims.y) {
        return;
    }
    var sum = vec4<f32>(0.0);
    for (var dy = -1; dy <= 1; dy++) {
        for (var dx = -1; dx <= 1; dx++) {
            let w = f32((2 - abs(dx)) * (2 - abs(dy)));
            sum += load_clamped(p + vec2<i32>(dx, dy), dims) * w;
        }
    }
    textureStore(t_output, p, sum / 16.0);
}
"#;

const COMPUTE_EDGE_DETECT: &str = r#"
@compute @workgroup_size(WG_X, WG_Y, 1)
fn cs_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = vec2<i32>(textureDimensions(t_input));
    let p = vec2<i32>(gid.xy);
    if (p.x >= dims.x || p.y >= dims.y) {
        return;
    }
    let tl = luma(load_clamped(p + vec2<i32>(-1, -1), dims).rgb);
    let t = luma(load_clamped(p + vec2<i32>(0, -1), dims).rgb);
    let tr = luma(load_clamped(p + vec2<i32>(1, -1), dims).rgb);
    let l = luma(load_clamped(p + vec2<i32>(-1, 0), dims).rgb);
    let r = luma(load_clamped(p + vec2<i32>(1, 0), dims).rgb);
    let bl = luma(load_clamped(p + vec2<i32>(-1, 1), dims).rgb);
    let b = luma(load_clamped(p + vec2<i32>(0, 1), dims).rgb);
    let br = luma(load_clamped(p + vec2<i32>(1, 1), dims).rgb);
    let gx = (tr + 2.0 * r + br) - (tl + 2.0 * l + bl);
    let gy = (bl + 2.0 * b + br) - (tl + 2.0 * t + tr);
    let m = min(length(vec2<f32>(gx, gy)), 1.0);
    let a = textureLoad(t_input, p, 0).a;
    textureStore(t_output, p, vec4<f32>(m, m, m, a));
}
"#;

/// Error from parsing or validating a WGSL module.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("{label}: WGSL parse error: {message}")]
    Parse { label: String, message: String },
    #[error("{label}: validation error: {message}")]
    Validation { label: String, message: String },
    #[error("{label}: no {stage} entry point")]
    MissingEntryPoint { label: String, stage: &'static str },
}

/// A WGSL module that naga accepted.
#[derive(Debug)]
pub struct ValidatedShader {
    pub label: String,
    pub source: String,
    pub module: naga::Module,
}

impl ValidatedShader {
    /// Workgroup shape of the first compute entry point, as compiled.
    pub fn workgroup_shape(&self) -> Result<WorkgroupShape, ShaderError> {
        self.module
            .entry_points
            .iter()
            .find(|ep| ep.stage == naga::ShaderStage::Compute)
            .map(|ep| WorkgroupShape {
                x: ep.workgroup_size[0],
                y: ep.workgroup_size[1],
            })
            .ok_or_else(|| ShaderError::MissingEntryPoint {
                label: self.label.clone(),
                stage: "compute",
            })
    }

    fn has_stage(&self, stage: naga::ShaderStage) -> bool {
        self.module.entry_points.iter().any(|ep| ep.stage == stage)
    }
}

/// Parse and validate `source`.
pub fn validate_wgsl(label: &str, source: String) -> Result<ValidatedShader, ShaderError> {
    let module = naga::front::wgsl::parse_str(&source).map_err(|e| ShaderError::Parse {
        label: label.to_string(),
        message: e.emit_to_string(&source),
    })?;
    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    validator.validate(&module).map_err(|e| ShaderError::Validation {
        label: label.to_string(),
        message: format!("{:?}", e),
    })?;
    Ok(ValidatedShader {
        label: label.to_string(),
        source,
        module,
    })
}

/// Compute workgroup dimensions for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupShape {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupShape {
    /// Execution width along x, the rest of the invocation budget along y.
    pub fn from_limits(limits: &wgpu::Limits) -> Self {
        let x = EXECUTION_WIDTH.min(limits.max_compute_workgroup_size_x).max(1);
        let y = (limits.max_compute_invocations_per_workgroup / x)
            .min(limits.max_compute_workgroup_size_y)
            .max(1);
        Self { x, y }
    }

    /// Number of workgroups covering a `width` x `height` grid.
    pub fn dispatch_size(&self, width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(self.x), height.div_ceil(self.y))
    }
}

/// WGSL bodies keyed by effect. Tests swap entries to simulate broken programs.
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    compute: HashMap<ComputeEffect, String>,
    vertex: HashMap<VertexEffect, String>,
    fragment: HashMap<FragmentEffect, String>,
}

impl ShaderLibrary {
    /// The built-in effect set.
    pub fn builtin() -> Self {
        let compute = HashMap::from([
            (ComputeEffect::Grayscale, COMPUTE_GRAYSCALE.to_string()),
            (ComputeEffect::Blur, COMPUTE_BLUR.to_string()),
            (ComputeEffect::EdgeDetect, COMPUTE_EDGE_DETECT.to_string()),
        ]);
        let vertex = HashMap::from([
            (VertexEffect::None, VERTEX_PASSTHROUGH.to_string()),
            (VertexEffect::Warp, VERTEX_WARP.to_string()),
            (VertexEffect::Wave, VERTEX_WAVE.to_string()),
            (VertexEffect::Sine, VERTEX_SINE.to_string()),
        ]);
        let fragment = HashMap::from([
            (FragmentEffect::ChromaticAberration, FRAGMENT_CHROMATIC_ABERRATION.to_string()),
            (FragmentEffect::ToneMap, FRAGMENT_TONE_MAP.to_string()),
            (FragmentEffect::FilmGrain, FRAGMENT_FILM_GRAIN.to_string()),
            (FragmentEffect::Vignette, FRAGMENT_VIGNETTE.to_string()),
        ]);
        Self { compute, vertex, fragment }
    }

    pub fn with_compute(mut self, effect: ComputeEffect, body: impl Into<String>) -> Self {
        self.compute.insert(effect, body.into());
        self
    }

    pub fn with_vertex(mut self, effect: VertexEffect, body: impl Into<String>) -> Self {
        self.vertex.insert(effect, body.into());
        self
    }

    pub fn with_fragment(mut self, effect: FragmentEffect, body: impl Into<String>) -> Self {
        self.fragment.insert(effect, body.into());
        self
    }

    /// Validated compute module for `effect` with the workgroup size baked in.
    pub fn compute(&self, effect: ComputeEffect, shape: WorkgroupShape) -> Result<ValidatedShader, ShaderError> {
        let label = format!("compute:{}", effect.label());
        let body = self.compute.get(&effect).ok_or(ShaderError::MissingEntryPoint {
            label: label.clone(),
            stage: "compute",
        })?;
        let source = format!(
            "const WG_X: u32 = {}u;\nconst WG_Y: u32 = {}u;\n{}{}",
            shape.x, shape.y, COMPUTE_PRELUDE, body
        );
        let shader = validate_wgsl(&label, source)?;
        if !shader.has_stage(naga::ShaderStage::Compute) {
            return Err(ShaderError::MissingEntryPoint { label, stage: "compute" });
        }
        Ok(shader)
    }

    pub fn vertex(&self, effect: VertexEffect) -> Result<ValidatedShader, ShaderError> {
        let label = format!("vertex:{}", effect.label());
        let body = self.vertex.get(&effect).ok_or(ShaderError::MissingEntryPoint {
            label: label.clone(),
            stage: "vertex",
        })?;
        let shader = validate_wgsl(&label, format!("{}{}", RENDER_PRELUDE, body))?;
        if !shader.has_stage(naga::ShaderStage::Vertex) {
            return Err(ShaderError::MissingEntryPoint { label, stage: "vertex" });
        }
        Ok(shader)
    }

    pub fn fragment(&self, effect: FragmentEffect) -> Result<ValidatedShader, ShaderError> {
        let label = format!("fragment:{}", effect.label());
        let body = self.fragment.get(&effect).ok_or(ShaderError::MissingEntryPoint {
            label: label.clone(),
            stage: "fragment",
        })?;
        let shader = validate_wgsl(&label, format!("{}{}", RENDER_PRELUDE, body))?;
        if !shader.has_stage(naga::ShaderStage::Fragment) {
            return Err(ShaderError::MissingEntryPoint { label, stage: "fragment" });
        }
        Ok(shader)
    }
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> WorkgroupShape {
        WorkgroupShape::from_limits(&wgpu::Limits::default())
    }

    #[test]
    fn test_builtin_programs_validate() {
        let library = ShaderLibrary::builtin();
        for effect in ComputeEffect::ALL.into_iter().filter(|e| *e != ComputeEffect::None) {
            library.compute(effect, shape()).unwrap();
        }
        for effect in VertexEffect::ALL {
            library.vertex(effect).unwrap();
        }
        for effect in FragmentEffect::ALL.into_iter().filter(|e| *e != FragmentEffect::None) {
            library.fragment(effect).unwrap();
        }
    }

    #[test]
    fn test_workgroup_size_is_baked_in() {
        let shader = ShaderLibrary::builtin().compute(ComputeEffect::Blur, shape()).unwrap();
        assert_eq!(shader.workgroup_shape().unwrap(), WorkgroupShape { x: 32, y: 8 });
    }

    #[test]
    fn test_render_module_has_no_workgroup_shape() {
        let shader = ShaderLibrary::builtin().vertex(VertexEffect::Warp).unwrap();
        let err = shader.workgroup_shape().unwrap_err();
        assert!(matches!(err, ShaderError::MissingEntryPoint { stage: "compute", ref label } if label == "vertex:Warp"));
    }

    #[test]
    fn test_shape_respects_limits() {
        let limits = wgpu::Limits {
            max_compute_workgroup_size_x: 16,
            max_compute_workgroup_size_y: 4,
            max_compute_invocations_per_workgroup: 128,
            ..wgpu::Limits::default()
        };
        let shape = WorkgroupShape::from_limits(&limits);
        assert_eq!(shape, WorkgroupShape { x: 16, y: 4 });
        assert_eq!(shape.dispatch_size(64, 48), (4, 12));
        assert_eq!(shape.dispatch_size(65, 49), (5, 13));
    }

    #[test]
    fn test_broken_source_is_rejected() {
        let library = ShaderLibrary::builtin().with_compute(ComputeEffect::Grayscale, "fn cs_main( {");
        let err = library.compute(ComputeEffect::Grayscale, shape()).unwrap_err();
        assert!(matches!(err, ShaderError::Parse { .. }));
    }

    #[test]
    fn test_missing_entry_point_is_rejected() {
        let library = ShaderLibrary::builtin().with_fragment(FragmentEffect::Vignette, "fn helper() -> f32 { return 1.0; }");
        let err = library.fragment(FragmentEffect::Vignette).unwrap_err();
        assert!(matches!(err, ShaderError::MissingEntryPoint { stage: "fragment", .. }));
    }

    #[test]
    fn test_unknown_effect_has_no_source() {
        assert!(ShaderLibrary::builtin().fragment(FragmentEffect::None).is_err());
    }
}
