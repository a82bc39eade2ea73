//! Effect selection and the shared settings store.
//!
//! The store is written by whoever drives the UI (keyboard, config reload) and
//! read once per processing run. Readers always get a whole copy of the value.

use clap::ValueEnum;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whole-image filter applied by the compute stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ComputeEffect {
    #[default]
    None,
    Grayscale,
    Blur,
    EdgeDetect,
}

/// Geometric perturbation applied by the vertex stage of the render program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum VertexEffect {
    #[default]
    None,
    Warp,
    Wave,
    Sine,
}

/// Color filter applied by the fragment stage of the render program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FragmentEffect {
    #[default]
    None,
    ChromaticAberration,
    ToneMap,
    FilmGrain,
    Vignette,
}

impl ComputeEffect {
    pub const ALL: [ComputeEffect; 4] = [Self::None, Self::Grayscale, Self::Blur, Self::EdgeDetect];

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Grayscale => "Grayscale",
            Self::Blur => "Blur",
            Self::EdgeDetect => "Edge",
        }
    }

    /// The following entry in `ALL`, wrapping around.
    pub fn next(self) -> Self {
        cycle(&Self::ALL, self)
    }
}

impl VertexEffect {
    pub const ALL: [VertexEffect; 4] = [Self::None, Self::Warp, Self::Wave, Self::Sine];

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Warp => "Warp",
            Self::Wave => "Wave",
            Self::Sine => "Sine",
        }
    }

    pub fn next(self) -> Self {
        cycle(&Self::ALL, self)
    }
}

impl FragmentEffect {
    pub const ALL: [FragmentEffect; 5] = [
        Self::None,
        Self::ChromaticAberration,
        Self::ToneMap,
        Self::FilmGrain,
        Self::Vignette,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::ChromaticAberration => "Chroma",
            Self::ToneMap => "Tone",
            Self::FilmGrain => "Grain",
            Self::Vignette => "Vignette",
        }
    }

    pub fn next(self) -> Self {
        cycle(&Self::ALL, self)
    }
}

fn cycle<T: Copy + PartialEq>(all: &[T], current: T) -> T {
    let index = all.iter().position(|e| *e == current).unwrap_or(0);
    all[(index + 1) % all.len()]
}

/// One complete, consistent combination of effects plus the animation clock.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EffectSelection {
    pub compute: ComputeEffect,
    pub vertex: VertexEffect,
    pub fragment: FragmentEffect,
    /// Animation time in seconds.
    pub time: f32,
}

impl EffectSelection {
    pub fn new(compute: ComputeEffect, vertex: VertexEffect, fragment: FragmentEffect) -> Self {
        Self {
            compute,
            vertex,
            fragment,
            time: 0.0,
        }
    }

    pub fn with_compute(self, compute: ComputeEffect) -> Self {
        Self { compute, ..self }
    }

    pub fn with_vertex(self, vertex: VertexEffect) -> Self {
        Self { vertex, ..self }
    }

    pub fn with_fragment(self, fragment: FragmentEffect) -> Self {
        Self { fragment, ..self }
    }

    /// True when no stage has any work to do.
    pub fn is_passthrough(&self) -> bool {
        self.compute == ComputeEffect::None
            && self.vertex == VertexEffect::None
            && self.fragment == FragmentEffect::None
    }

    /// True when the render stage (vertex and/or fragment) should run.
    pub fn wants_render(&self) -> bool {
        self.vertex != VertexEffect::None || self.fragment != FragmentEffect::None
    }
}

impl fmt::Display for EffectSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "compute={} vertex={} fragment={}",
            self.compute.label(),
            self.vertex.label(),
            self.fragment.label()
        )
    }
}

/// Length of the animation clock cycle in seconds.
///
/// A multiple of 4π, so every time-driven effect lines up across the wrap.
pub const TIME_PERIOD: f32 = 256.0 * std::f32::consts::PI;

/// Thread-safe holder of the current [`EffectSelection`].
///
/// Every mutation replaces the value under a short write lock, so a snapshot
/// is either entirely before or entirely after a concurrent write.
#[derive(Debug, Default)]
pub struct SettingsStore {
    current: RwLock<EffectSelection>,
}

impl SettingsStore {
    pub fn new(initial: EffectSelection) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// Copy out the current selection.
    pub fn read(&self) -> EffectSelection {
        *self.current.read()
    }

    /// Replace the whole selection.
    pub fn write(&self, selection: EffectSelection) {
        *self.current.write() = selection;
    }

    /// Atomic read-modify-write. Returns the value that was stored.
    pub fn update(&self, f: impl FnOnce(EffectSelection) -> EffectSelection) -> EffectSelection {
        let mut guard = self.current.write();
        *guard = f(*guard);
        *guard
    }

    /// Advance the animation clock without touching the effect choice.
    ///
    /// The clock wraps at [`TIME_PERIOD`] so long sessions keep sub-millisecond resolution.
    pub fn advance_time(&self, delta: f32) {
        let mut guard = self.current.write();
        guard.time = (guard.time + delta).rem_euclid(TIME_PERIOD);
    }
}
