use image::{imageops::FilterType, RgbImage};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use crate::error::Result;
use crate::inference::{load_session, pack_nhwc};
use crate::types::{BoundingBox, Landmarks, Point2};

/// Places landmark points inside a detected face.
///
/// `Ok(None)` means landmarks are unavailable for this face; the caller carries on
/// without markers.
pub trait LandmarkPredictor {
    fn name(&self) -> String;
    fn predict(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Option<Landmarks>>;
}

/// Face-mesh indices of the four eye corners (outer/inner left, inner/outer right).
pub const EYE_CORNERS: [usize; 4] = [33, 133, 362, 263];

/// Lower-lid points used for the inter-eye spacing in the distance estimate.
pub const DISTANCE_PAIR: (usize, usize) = (145, 374);

/// Average inter-eye spacing of an adult face, in centimeters.
pub const EYE_SPACING_CM: f32 = 6.3;

/// Focal length of the reference webcam, in pixels.
pub const FOCAL_LENGTH_PX: f32 = 840.0;

/// Pinhole-camera distance to the viewer from the landmark eye spacing.
pub fn viewer_distance_cm(landmarks: &Landmarks) -> Option<f32> {
    let left = landmarks.get(DISTANCE_PAIR.0)?;
    let right = landmarks.get(DISTANCE_PAIR.1)?;
    let spacing = left.distance(&right);
    if spacing <= f32::EPSILON {
        return None;
    }
    Some(EYE_SPACING_CM * FOCAL_LENGTH_PX / spacing)
}

/// Eye-corner markers to draw, skipping indices the predictor did not produce.
pub fn eye_corner_markers(landmarks: &Landmarks) -> Vec<Point2> {
    EYE_CORNERS.iter().filter_map(|&i| landmarks.get(i)).collect()
}

const MESH_INPUT: u32 = 192;
const MESH_POINTS: usize = 468;

/// 468-point face mesh run on a padded crop of the face box.
pub struct FaceMeshPredictor {
    session: Session,
}

impl FaceMeshPredictor {
    pub fn new(model_path: &Path) -> Result<Self> {
        Ok(Self {
            session: load_session(model_path)?,
        })
    }

    /// Face box grown by 25% for mesh context, clipped to the frame: (x, y, w, h).
    fn mesh_roi(frame: &RgbImage, face: &BoundingBox) -> Option<(u32, u32, u32, u32)> {
        let pad_w = face.width() as f32 * 0.25;
        let pad_h = face.height() as f32 * 0.25;
        let x1 = (face.x1() as f32 - pad_w / 2.0).max(0.0);
        let y1 = (face.y1() as f32 - pad_h / 2.0).max(0.0);
        let x2 = (face.x2() as f32 + pad_w / 2.0).min(frame.width() as f32);
        let y2 = (face.y2() as f32 + pad_h / 2.0).min(frame.height() as f32);

        let (w, h) = ((x2 - x1) as u32, (y2 - y1) as u32);
        if w == 0 || h == 0 {
            return None;
        }
        Some((x1 as u32, y1 as u32, w, h))
    }
}

impl LandmarkPredictor for FaceMeshPredictor {
    fn name(&self) -> String {
        "Face Mesh (468 pts)".to_string()
    }

    fn predict(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Option<Landmarks>> {
        let Some((x, y, w, h)) = Self::mesh_roi(frame, face) else {
            return Ok(None);
        };

        let crop = image::imageops::crop_imm(frame, x, y, w, h).to_image();
        let resized = image::imageops::resize(&crop, MESH_INPUT, MESH_INPUT, FilterType::Triangle);
        let input_data = pack_nhwc(&resized, |v| v as f32 / 127.5 - 1.0);

        let side = MESH_INPUT as i64;
        let input = Tensor::from_array((vec![1i64, side, side, 3], input_data))?;
        let outputs = self.session.run(ort::inputs![input])?;
        let (_, mesh) = outputs[0].try_extract_tensor::<f32>()?;

        if mesh.len() < MESH_POINTS * 3 {
            return Ok(None);
        }

        // Mesh space (0..192) -> crop -> frame
        let scale_x = w as f32 / MESH_INPUT as f32;
        let scale_y = h as f32 / MESH_INPUT as f32;
        let points = mesh
            .chunks_exact(3)
            .take(MESH_POINTS)
            .map(|p| Point2::new(x as f32 + p[0] * scale_x, y as f32 + p[1] * scale_y))
            .collect();

        Ok(Some(Landmarks { points }))
    }
}
