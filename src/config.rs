//! YAML configuration file and its hot-reload watcher.

use crate::capture::CaptureConfig;
use crate::settings::{ComputeEffect, EffectSelection, FragmentEffect, SettingsStore, VertexEffect};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("cannot watch config file: {0}")]
    Watch(#[from] notify::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraSection,
    pub effects: EffectsSection,
    pub display: DisplaySection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSection {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraSection {
    fn default() -> Self {
        let defaults = CaptureConfig::default();
        Self {
            device_index: defaults.device_index,
            width: defaults.width,
            height: defaults.height,
            fps: defaults.fps,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsSection {
    pub compute: ComputeEffect,
    pub vertex: VertexEffect,
    pub fragment: FragmentEffect,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySection {
    /// Presentation rate cap; `None` follows the monitor.
    pub fps_cap: Option<u32>,
}

impl Config {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn capture(&self) -> CaptureConfig {
        CaptureConfig {
            device_index: self.camera.device_index,
            width: self.camera.width,
            height: self.camera.height,
            fps: self.camera.fps,
        }
    }

    /// The configured effects, starting at time zero.
    pub fn selection(&self) -> EffectSelection {
        EffectSelection::new(self.effects.compute, self.effects.vertex, self.effects.fragment)
    }

    /// Replace the store's effects with this file's, keeping the running time.
    pub fn apply_effects(&self, store: &SettingsStore) -> EffectSelection {
        let effects = self.effects;
        store.update(|current| EffectSelection {
            compute: effects.compute,
            vertex: effects.vertex,
            fragment: effects.fragment,
            time: current.time,
        })
    }
}

/// Watches the config file and hands back the new contents after each edit.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    current: Config,
}

impl ConfigWatcher {
    pub fn new(path: PathBuf, current: Config) -> Result<Self, ConfigError> {
        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        info!("Watching config file {:?} for changes", path);
        Ok(Self {
            path,
            _watcher: watcher,
            rx,
            current,
        })
    }

    /// Non-blocking. Returns the reloaded config if the file changed and still parses.
    pub fn poll(&mut self) -> Option<&Config> {
        let mut touched = false;
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) => touched = true,
                Ok(_) => {}
                Err(e) => warn!("Config watch error: {}", e),
            }
        }
        if !touched {
            return None;
        }

        match Config::load(&self.path) {
            Ok(config) if config == self.current => None,
            Ok(config) => {
                info!("Reloaded {:?}", self.path);
                self.current = config;
                Some(&self.current)
            }
            Err(e) => {
                // Keep running on the last good config while the file is mid-edit.
                warn!("Ignoring config change: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
camera:
  device_index: 1
  width: 640
  height: 480
  fps: 60
effects:
  compute: edge-detect
  vertex: wave
  fragment: chromatic-aberration
display:
  fps_cap: 30
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.capture().device_index, 1);
        assert_eq!(config.capture().fps, 60);
        assert_eq!(config.effects.compute, ComputeEffect::EdgeDetect);
        assert_eq!(config.effects.vertex, VertexEffect::Wave);
        assert_eq!(config.effects.fragment, FragmentEffect::ChromaticAberration);
        assert_eq!(config.display.fps_cap, Some(30));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = Config::from_yaml_str("effects:\n  fragment: vignette\n").unwrap();
        assert_eq!(config.camera, CameraSection::default());
        assert_eq!(config.display.fps_cap, None);
        assert_eq!(
            config.selection(),
            EffectSelection::new(ComputeEffect::None, VertexEffect::None, FragmentEffect::Vignette)
        );
    }

    #[test]
    fn test_unknown_effect_rejected() {
        let err = Config::from_yaml_str("effects:\n  compute: sepia\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_apply_effects_keeps_time() {
        let store = SettingsStore::new(EffectSelection::default());
        store.advance_time(2.5);

        let config = Config::from_yaml_str("effects:\n  compute: blur\n  fragment: tone-map\n").unwrap();
        let applied = config.apply_effects(&store);
        assert_eq!(applied.compute, ComputeEffect::Blur);
        assert_eq!(applied.fragment, FragmentEffect::ToneMap);
        assert_eq!(applied.time, 2.5);
        assert_eq!(store.read(), applied);
    }

    #[test]
    fn test_load_reports_path() {
        let err = Config::load(Path::new("/nonexistent/lumen.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/lumen.yaml"));
    }
}
