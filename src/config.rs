use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{GazeError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub models: ModelsConfig,
    pub detection: DetectionConfig,
    pub eyes: EyeConfig,
    pub pupil: PupilConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub index: u32,
    pub mirror: bool,
    /// Read frames from a directory of images instead of a camera
    pub replay_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Yolo,
    UltraFace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorModel {
    pub kind: DetectorKind,
    pub path: PathBuf,
}

impl Default for DetectorModel {
    fn default() -> Self {
        Self {
            kind: DetectorKind::Yolo,
            path: PathBuf::from("models/yolov12n-face.onnx"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub detector: DetectorModel,
    pub gaze_path: Option<PathBuf>,
    pub head_pose_path: Option<PathBuf>,
    pub face_mesh_path: Option<PathBuf>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            detector: DetectorModel::default(),
            gaze_path: Some(PathBuf::from("models/gaze_nn.onnx")),
            head_pose_path: None,
            face_mesh_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence: f32,
    pub input_size: u32,
    pub iou_threshold: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            input_size: 640,
            iou_threshold: 0.45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeConfig {
    pub window_width: u32,
    pub window_height: u32,
    /// Horizontal eye-center fraction of the face box for the near-side eye
    pub near_x: f64,
    /// Horizontal eye-center fraction of the face box for the far-side eye
    pub far_x: f64,
    /// Vertical eye-center fraction shared by both eyes
    pub center_y: f64,
    /// Run landmarks and the eye pipeline every Nth frame
    pub landmark_every: u64,
}

impl Default for EyeConfig {
    fn default() -> Self {
        Self {
            window_width: 60,
            window_height: 36,
            near_x: 0.3,
            far_x: 0.7,
            center_y: 0.35,
            landmark_every: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PupilConfig {
    pub blur_sigma: f32,
}

impl Default for PupilConfig {
    fn default() -> Self {
        // Sigma conventionally paired with a 7x7 kernel: 0.3 * ((7 - 1) * 0.5 - 1) + 0.8
        Self { blur_sigma: 1.4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    Pupil,
    Vector,
    Combined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub bind: String,
    pub path: String,
    pub tick_ms: u64,
    pub format: PayloadFormat,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            path: "/gaze".to_string(),
            tick_ms: 33,
            format: PayloadFormat::Pupil,
        }
    }
}

impl StreamConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl AppConfig {
    pub const DEFAULT_PATH: &'static str = "config.json";

    /// Loads the config at `path`, writing defaults there if it does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)?;
            let config = Self::from_json(&content)?;
            info!("Loaded configuration from {}", path.display());
            config
        } else {
            info!("Configuration file not found. Creating default at {}", path.display());
            let config = Self::default();
            config.save(path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| GazeError::config("config", e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fraction = |field: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(GazeError::config(field, format!("{value} is outside [0, 1]")))
            }
        };

        fraction("eyes.near_x", self.eyes.near_x)?;
        fraction("eyes.far_x", self.eyes.far_x)?;
        fraction("eyes.center_y", self.eyes.center_y)?;
        fraction("detection.confidence", self.detection.confidence as f64)?;
        fraction("detection.iou_threshold", self.detection.iou_threshold as f64)?;

        if self.eyes.window_width == 0 || self.eyes.window_height == 0 {
            return Err(GazeError::config("eyes.window", "window must have a non-zero area"));
        }
        if self.eyes.landmark_every == 0 {
            return Err(GazeError::config("eyes.landmark_every", "must be at least 1"));
        }
        if self.detection.input_size == 0 {
            return Err(GazeError::config("detection.input_size", "must be positive"));
        }
        if !(self.pupil.blur_sigma > 0.0 && self.pupil.blur_sigma.is_finite()) {
            return Err(GazeError::config("pupil.blur_sigma", "must be positive"));
        }
        if self.stream.tick_ms == 0 {
            return Err(GazeError::config("stream.tick_ms", "must be positive"));
        }
        if !self.stream.path.starts_with('/') {
            return Err(GazeError::config("stream.path", "must start with '/'"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let config = AppConfig::default();
        assert_eq!(config.eyes.window_width, 60);
        assert_eq!(config.eyes.window_height, 36);
        assert_eq!(config.eyes.landmark_every, 3);
        assert_eq!(config.detection.confidence, 0.5);
        assert_eq!(config.stream.path, "/gaze");
        assert_eq!(config.stream.tick(), Duration::from_millis(33));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = AppConfig::from_json(r#"{ "stream": { "format": "combined" } }"#).unwrap();
        assert_eq!(config.stream.format, PayloadFormat::Combined);
        assert_eq!(config.stream.tick_ms, 33);
        assert_eq!(config.eyes.near_x, 0.3);
        assert_eq!(config.models.detector.kind, DetectorKind::Yolo);
    }

    #[test]
    fn detector_kind_parses_lowercase() {
        let config =
            AppConfig::from_json(r#"{ "models": { "detector": { "kind": "ultraface" } } }"#)
                .unwrap();
        assert_eq!(config.models.detector.kind, DetectorKind::UltraFace);
    }

    #[test]
    fn out_of_range_fraction_is_rejected() {
        let mut config = AppConfig::default();
        config.eyes.far_x = 1.2;
        match config.validate() {
            Err(GazeError::Config { field, .. }) => assert_eq!(field, "eyes.far_x"),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn zero_tick_and_zero_decimation_are_rejected() {
        let mut config = AppConfig::default();
        config.stream.tick_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.eyes.landmark_every = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.stream.bind, "127.0.0.1:8000");
        assert!(path.exists());

        let reloaded = AppConfig::load(&path).unwrap();
        assert_eq!(reloaded.eyes.window_width, config.eyes.window_width);
    }

    #[test]
    fn malformed_file_is_fatal_and_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ \"eyes\": ").unwrap();

        assert!(AppConfig::load(&path).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ \"eyes\": ");
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            AppConfig::from_json("{ not json"),
            Err(GazeError::Config { .. })
        ));
    }
}
