use super::*;
use image::Rgb;
use std::sync::{Arc, Mutex};

// =========================================================================
// Test doubles
// =========================================================================

/// Returns a fixed projection and records what it was fed.
struct FixedModel {
    output: [f32; 3],
    seen: Arc<Mutex<Vec<(EyeTensor, [f32; 3])>>>,
}

impl FixedModel {
    fn new(output: [f32; 3]) -> (Self, Arc<Mutex<Vec<(EyeTensor, [f32; 3])>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                output,
                seen: Arc::clone(&seen),
            },
            seen,
        )
    }
}

impl GazeModel for FixedModel {
    fn name(&self) -> String {
        "fixed".to_string()
    }

    fn infer(&mut self, eyes: &EyeTensor, head_pose: [f32; 3]) -> Result<[f32; 3]> {
        self.seen.lock().unwrap().push((eyes.clone(), head_pose));
        Ok(self.output)
    }
}

fn crop(value: u8, width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([value, value, value]))
}

// =========================================================================
// Eye tensor
// =========================================================================

#[test]
fn eye_tensor_has_model_shape_even_for_clipped_crops() {
    let eyes = EyeTensor::from_crops(&crop(0, 42, 36), &crop(255, 60, 20), 60, 36);
    assert_eq!(eyes.shape(), [1, 2, 36, 60]);
    assert_eq!(eyes.data().len(), 2 * 36 * 60);
}

#[test]
fn near_eye_is_channel_zero_and_values_are_unit_scaled() {
    let eyes = EyeTensor::from_crops(&crop(0, 60, 36), &crop(255, 60, 36), 60, 36);
    assert!(eyes.channel(0).iter().all(|&v| v == 0.0));
    assert!(eyes.channel(1).iter().all(|&v| (v - 1.0).abs() < 1e-6));
}

// =========================================================================
// Estimator
// =========================================================================

#[test]
fn estimate_is_unit_length() {
    for raw in [[3.0, 4.0, 12.0], [-0.2, 0.1, 0.9], [1e-3, 0.0, 0.0], [-5.0, -5.0, -5.0]] {
        let (model, _) = FixedModel::new(raw);
        let mut estimator = GazeEstimator::new(Box::new(model), 60, 36);
        let gaze = estimator
            .estimate(&crop(90, 60, 36), &crop(90, 60, 36), [0.0; 3])
            .unwrap()
            .unwrap();
        assert!((gaze.norm() - 1.0).abs() < 1e-5, "norm {} for {:?}", gaze.norm(), raw);
    }
}

#[test]
fn zero_projection_has_no_direction() {
    let (model, _) = FixedModel::new([0.0, 0.0, 0.0]);
    let mut estimator = GazeEstimator::new(Box::new(model), 60, 36);
    let gaze = estimator
        .estimate(&crop(90, 60, 36), &crop(90, 60, 36), [0.0; 3])
        .unwrap();
    assert!(gaze.is_none());
}

#[test]
fn model_sees_the_real_crops_and_head_pose() {
    let (model, seen) = FixedModel::new([0.0, 0.0, 1.0]);
    let mut estimator = GazeEstimator::new(Box::new(model), 60, 36);
    let pose = [0.1, -0.2, 0.05];

    estimator
        .estimate(&crop(10, 60, 36), &crop(200, 60, 36), pose)
        .unwrap();
    estimator
        .estimate(&crop(10, 60, 36), &crop(200, 60, 36), pose)
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    // Identical inputs produce identical tensors; nothing synthetic is injected
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[0].1, pose);
    assert!((seen[0].0.channel(0)[0] - 10.0 / 255.0).abs() < 1e-6);
    assert!((seen[0].0.channel(1)[0] - 200.0 / 255.0).abs() < 1e-6);
}
