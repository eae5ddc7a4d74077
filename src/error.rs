//! Error types for the gaze pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Failures that stop the pipeline or prevent it from starting.
///
/// Per-frame misses (an eye crop with no area, no pupil blob) are not errors;
/// they surface as `None` and the frame moves on.
#[derive(Error, Debug)]
pub enum GazeError {
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Model file not found: {}", .0.display())]
    ModelMissing(PathBuf),

    #[error("Inference failed: {0}")]
    Inference(#[from] ort::Error),

    #[error("Unexpected model output: {0}")]
    ModelOutput(String),

    #[error("Invalid configuration value: {field} - {message}")]
    Config { field: String, message: String },

    #[error("Stream server error: {0}")]
    Server(String),

    #[error("Display error: {0}")]
    Display(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GazeError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, GazeError>;
