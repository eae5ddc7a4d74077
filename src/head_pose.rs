use image::{imageops::FilterType, RgbImage};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use crate::error::{GazeError, Result};
use crate::inference::{expectation, load_session, pack_nchw, softmax};
use crate::types::{BoundingBox, HeadPose};

pub trait HeadPoseEstimator {
    fn name(&self) -> String;
    fn estimate(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Option<HeadPose>>;
}

const POSE_INPUT: u32 = 224;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// WHENet head pose: binned yaw/roll/pitch classifiers decoded by expectation.
pub struct WhenetHeadPose {
    session: Session,
}

impl WhenetHeadPose {
    pub fn new(model_path: &Path) -> Result<Self> {
        Ok(Self {
            session: load_session(model_path)?,
        })
    }

    /// Square crop around the face, padded by 20% of its longer side and clipped to the frame.
    fn square_roi(frame: &RgbImage, face: &BoundingBox) -> Option<(u32, u32, u32, u32)> {
        let side = face.width().max(face.height()) as f32;
        let size = side * 1.2;
        let cx = face.x1() as f32 + face.width() as f32 / 2.0;
        let cy = face.y1() as f32 + face.height() as f32 / 2.0;

        let x1 = (cx - size / 2.0).max(0.0);
        let y1 = (cy - size / 2.0).max(0.0);
        let x2 = (cx + size / 2.0).min(frame.width() as f32);
        let y2 = (cy + size / 2.0).min(frame.height() as f32);

        let (w, h) = ((x2 - x1) as u32, (y2 - y1) as u32);
        if w == 0 || h == 0 {
            return None;
        }
        Some((x1 as u32, y1 as u32, w, h))
    }
}

impl HeadPoseEstimator for WhenetHeadPose {
    fn name(&self) -> String {
        "Head Pose (WHENet)".to_string()
    }

    fn estimate(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Option<HeadPose>> {
        let Some((x, y, w, h)) = Self::square_roi(frame, face) else {
            return Ok(None);
        };
        let crop = image::imageops::crop_imm(frame, x, y, w, h).to_image();
        let resized = image::imageops::resize(&crop, POSE_INPUT, POSE_INPUT, FilterType::Triangle);
        let input_data = pack_nchw(&resized, |c, v| {
            (v as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
        });

        let side = POSE_INPUT as i64;
        let input = Tensor::from_array((vec![1i64, 3, side, side], input_data))?;
        let outputs = self.session.run(ort::inputs![input])?;
        if outputs.len() < 3 {
            return Err(GazeError::ModelOutput(format!(
                "head pose model returned {} outputs (expected 3)",
                outputs.len()
            )));
        }

        let (_, yaw_logits) = outputs[0].try_extract_tensor::<f32>()?;
        let (_, roll_logits) = outputs[1].try_extract_tensor::<f32>()?;
        let (_, pitch_logits) = outputs[2].try_extract_tensor::<f32>()?;

        // Yaw: 120 bins of 3 degrees from -180; pitch and roll: 66 bins from -99
        Ok(Some(HeadPose {
            yaw: expectation(&softmax(yaw_logits), -180.0, 3.0),
            pitch: expectation(&softmax(pitch_logits), -99.0, 3.0),
            roll: expectation(&softmax(roll_logits), -99.0, 3.0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_roi_pads_and_clips() {
        let frame = RgbImage::new(200, 200);
        let face = BoundingBox::new(50, 50, 150, 130).unwrap();
        let (x, y, w, h) = WhenetHeadPose::square_roi(&frame, &face).unwrap();
        assert_eq!((x, y, w, h), (40, 30, 120, 120));

        let corner = BoundingBox::new(0, 0, 40, 40).unwrap();
        let (x, y, w, h) = WhenetHeadPose::square_roi(&frame, &corner).unwrap();
        assert_eq!((x, y), (0, 0));
        assert_eq!((w, h), (44, 44));
    }
}
