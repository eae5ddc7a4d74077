//! ONNX Runtime plumbing shared by every model-backed collaborator.

use image::RgbImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::info;

use crate::error::{GazeError, Result};

/// Loads a model once at startup. A missing file is reported before ONNX Runtime is touched.
pub fn load_session(path: &Path) -> Result<Session> {
    if !path.exists() {
        return Err(GazeError::ModelMissing(path.to_path_buf()));
    }

    info!(model = %path.display(), "Loading model");
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .with_execution_providers([
            ort::execution_providers::CPUExecutionProvider::default().build(),
        ])?
        .commit_from_file(path)?;
    Ok(session)
}

/// Packs an RGB image into planar NCHW order, applying `normalize(channel, value)` per sample.
pub fn pack_nchw(image: &RgbImage, normalize: impl Fn(usize, u8) -> f32) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let mut data = Vec::with_capacity(3 * (width * height) as usize);
    for c in 0..3 {
        for y in 0..height {
            for x in 0..width {
                data.push(normalize(c, image.get_pixel(x, y)[c]));
            }
        }
    }
    data
}

/// Packs an RGB image into interleaved NHWC order.
pub fn pack_nhwc(image: &RgbImage, normalize: impl Fn(u8) -> f32) -> Vec<f32> {
    image.as_raw().iter().map(|&v| normalize(v)).collect()
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max_logit).exp()).collect();
    let sum_exps: f32 = exps.iter().sum();
    exps.iter().map(|&x| x / sum_exps).collect()
}

/// Expected value of binned probabilities where bin `i` stands for `range_min + i * step`.
pub fn expectation(probs: &[f32], range_min: f32, step: f32) -> f32 {
    probs
        .iter()
        .enumerate()
        .map(|(i, &p)| p * (range_min + i as f32 * step))
        .sum()
}
