use serde::{Deserialize, Serialize};

/// A 2D point in pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned face rectangle in integer frame coordinates.
///
/// Always satisfies `x1 < x2` and `y1 < y2`; construct through [`BoundingBox::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl BoundingBox {
    /// Returns `None` for degenerate boxes.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Self> {
        if x1 < x2 && y1 < y2 {
            Some(Self { x1, y1, x2, y2 })
        } else {
            None
        }
    }

    /// Truncates float corners the way detector outputs are consumed (`int(x)`).
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Self> {
        if !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
            return None;
        }
        Self::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32)
    }

    pub fn x1(&self) -> i32 {
        self.x1
    }

    pub fn y1(&self) -> i32 {
        self.y1
    }

    pub fn x2(&self) -> i32 {
        self.x2
    }

    pub fn y2(&self) -> i32 {
        self.y2
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }
        let inter = (ix2 - ix1) as i64 * (iy2 - iy1) as i64;
        let union = self.area() + other.area() - inter;
        inter as f32 / union as f32
    }
}

/// A face found by a [`crate::detector::FaceDetector`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub score: f32,
}

/// Indexed 2D landmark points in frame coordinates.
#[derive(Debug, Clone, Default)]
pub struct Landmarks {
    pub points: Vec<Point2>,
}

impl Landmarks {
    pub fn get(&self, index: usize) -> Option<Point2> {
        self.points.get(index).copied()
    }
}

/// Head orientation in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeadPose {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl HeadPose {
    /// `[yaw, pitch, roll]` in radians, the layout the gaze model consumes.
    pub fn as_model_input(&self) -> [f32; 3] {
        [
            self.yaw.to_radians(),
            self.pitch.to_radians(),
            self.roll.to_radians(),
        ]
    }
}

/// Sub-pixel pupil centroid local to an eye region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PupilEstimate {
    pub x: f32,
    pub y: f32,
}

/// Unit-length 3D look direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeVector {
    x: f32,
    y: f32,
    z: f32,
}

impl GazeVector {
    /// Looking straight into the camera.
    pub const FORWARD: GazeVector = GazeVector { x: 0.0, y: 0.0, z: 1.0 };

    /// L2-normalizes a raw projection. `None` when the norm is zero or not finite.
    pub fn normalize(raw: [f32; 3]) -> Option<Self> {
        // Squares of large or tiny f32 components overflow or flush to zero in f32
        let [x, y, z] = raw.map(f64::from);
        let norm = (x * x + y * y + z * z).sqrt();
        if !norm.is_finite() || norm == 0.0 {
            return None;
        }
        Some(Self {
            x: (x / norm) as f32,
            y: (y / norm) as f32,
            z: (z / norm) as f32,
        })
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn z(&self) -> f32 {
        self.z
    }

    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_boxes_are_rejected() {
        assert!(BoundingBox::new(10, 10, 10, 20).is_none());
        assert!(BoundingBox::new(10, 20, 30, 5).is_none());
        assert!(BoundingBox::from_corners(f32::NAN, 0.0, 4.0, 4.0).is_none());
        assert!(BoundingBox::new(0, 0, 1, 1).is_some());
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(0, 0, 10, 10).unwrap();
        let b = BoundingBox::new(20, 20, 30, 30).unwrap();
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);

        let half = BoundingBox::new(5, 0, 15, 10).unwrap();
        assert!((a.iou(&half) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_yields_unit_vectors() {
        for raw in [[3.0, 4.0, 0.0], [-0.2, 0.1, -7.5], [1e-3, 2e-3, 3e-3]] {
            let v = GazeVector::normalize(raw).unwrap();
            assert!((v.norm() - 1.0).abs() < 1e-5, "norm {} for {:?}", v.norm(), raw);
        }
    }

    #[test]
    fn normalize_handles_components_whose_squares_leave_f32_range() {
        let v = GazeVector::normalize([0.0, 3e19, 4e19]).unwrap();
        assert_eq!(v.x(), 0.0);
        assert!((v.y() - 0.6).abs() < 1e-6);
        assert!((v.z() - 0.8).abs() < 1e-6);

        let v = GazeVector::normalize([3e-25, 0.0, -4e-25]).unwrap();
        assert!((v.x() - 0.6).abs() < 1e-6);
        assert!((v.z() + 0.8).abs() < 1e-6);
        assert!((v.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn normalize_refuses_zero_and_nan() {
        assert!(GazeVector::normalize([0.0, 0.0, 0.0]).is_none());
        assert!(GazeVector::normalize([f32::NAN, 1.0, 0.0]).is_none());
        assert!(GazeVector::normalize([f32::INFINITY, 1.0, 0.0]).is_none());
    }

    #[test]
    fn head_pose_is_fed_in_radians() {
        let pose = HeadPose { yaw: 180.0, pitch: 90.0, roll: 0.0 };
        let input = pose.as_model_input();
        assert!((input[0] - std::f32::consts::PI).abs() < 1e-6);
        assert!((input[1] - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert_eq!(input[2], 0.0);
    }
}
