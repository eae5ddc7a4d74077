//! Neural gaze direction from the two eye crops and head pose.
//!
//! The model is a small convnet (three conv/pool stages, eye projection, fusion with
//! the head-pose vector, linear head to three components) exported to ONNX. It is
//! loaded once and only ever run for inference.

use image::{imageops::FilterType, RgbImage};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use tracing::debug;

use crate::error::{GazeError, Result};
use crate::inference::load_session;
use crate::pupil::intensity;
use crate::types::GazeVector;

/// Stacked grayscale eye pair in NCHW layout: channel 0 is the near eye, channel 1 the far eye.
#[derive(Debug, Clone, PartialEq)]
pub struct EyeTensor {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl EyeTensor {
    /// Resizes both crops to the model window and scales intensity to [0, 1].
    pub fn from_crops(near: &RgbImage, far: &RgbImage, width: u32, height: u32) -> Self {
        let mut data = Vec::with_capacity(2 * (width * height) as usize);
        for crop in [near, far] {
            let gray = intensity(crop);
            let resized = image::imageops::resize(&gray, width, height, FilterType::Triangle);
            data.extend(resized.as_raw().iter().map(|&v| v as f32 / 255.0));
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// `[1, 2, height, width]`
    pub fn shape(&self) -> [i64; 4] {
        [1, 2, self.height as i64, self.width as i64]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        let plane = (self.width * self.height) as usize;
        &self.data[index * plane..(index + 1) * plane]
    }
}

/// Raw 3-component projection from an eye tensor and `[yaw, pitch, roll]` in radians.
pub trait GazeModel {
    fn name(&self) -> String;
    fn infer(&mut self, eyes: &EyeTensor, head_pose: [f32; 3]) -> Result<[f32; 3]>;
}

pub struct OnnxGazeModel {
    session: Session,
}

impl OnnxGazeModel {
    pub fn new(model_path: &Path) -> Result<Self> {
        Ok(Self {
            session: load_session(model_path)?,
        })
    }
}

impl GazeModel for OnnxGazeModel {
    fn name(&self) -> String {
        "Gaze NN (eyes + head pose)".to_string()
    }

    fn infer(&mut self, eyes: &EyeTensor, head_pose: [f32; 3]) -> Result<[f32; 3]> {
        let eye_input = Tensor::from_array((eyes.shape().to_vec(), eyes.data().to_vec()))?;
        let pose_input = Tensor::from_array((vec![1i64, 3], head_pose.to_vec()))?;

        let outputs = self.session.run(ort::inputs![eye_input, pose_input])?;
        let (_, raw) = outputs[0].try_extract_tensor::<f32>()?;
        match raw {
            [x, y, z] => Ok([*x, *y, *z]),
            other => Err(GazeError::ModelOutput(format!(
                "gaze model returned {} values (expected 3)",
                other.len()
            ))),
        }
    }
}

/// Runs a [`GazeModel`] on real eye crops and normalizes the result to unit length.
pub struct GazeEstimator {
    model: Box<dyn GazeModel>,
    window_width: u32,
    window_height: u32,
}

impl GazeEstimator {
    pub fn new(model: Box<dyn GazeModel>, window_width: u32, window_height: u32) -> Self {
        Self {
            model,
            window_width,
            window_height,
        }
    }

    pub fn name(&self) -> String {
        self.model.name()
    }

    /// `Ok(None)` when the model's projection has zero norm; the caller keeps its last vector.
    pub fn estimate(
        &mut self,
        near: &RgbImage,
        far: &RgbImage,
        head_pose: [f32; 3],
    ) -> Result<Option<GazeVector>> {
        let eyes = EyeTensor::from_crops(near, far, self.window_width, self.window_height);
        let raw = self.model.infer(&eyes, head_pose)?;
        let gaze = GazeVector::normalize(raw);
        if gaze.is_none() {
            debug!(?raw, "Gaze projection has no direction");
        }
        Ok(gaze)
    }
}

#[cfg(test)]
#[path = "gaze_tests.rs"]
mod tests;
