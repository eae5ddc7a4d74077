//! Heuristic eye windows derived from a face box.
//!
//! Eye centers are not detected. They sit at fixed fractions of the face box, so the
//! crop is only as good as the face's alignment with those fractions.

use image::RgbImage;

use crate::config::EyeConfig;
use crate::types::{BoundingBox, Point2, PupilEstimate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeSide {
    /// The eye nearer the face box's left edge (the subject's right eye on an unmirrored camera)
    Near,
    Far,
}

impl EyeSide {
    pub const BOTH: [EyeSide; 2] = [EyeSide::Near, EyeSide::Far];
}

/// A crop window in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// An eye patch together with where it came from in the frame.
#[derive(Debug, Clone)]
pub struct EyeRegion {
    pub side: EyeSide,
    pub origin: (u32, u32),
    pub image: RgbImage,
}

impl EyeRegion {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// `global = origin + local`
    pub fn to_frame(&self, pupil: &PupilEstimate) -> Point2 {
        Point2::new(self.origin.0 as f32 + pupil.x, self.origin.1 as f32 + pupil.y)
    }
}

/// The eye-center fractions and nominal window size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeGeometry {
    pub near_x: f64,
    pub far_x: f64,
    pub center_y: f64,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for EyeGeometry {
    fn default() -> Self {
        Self::from_config(&EyeConfig::default())
    }
}

impl EyeGeometry {
    pub fn from_config(config: &EyeConfig) -> Self {
        Self {
            near_x: config.near_x,
            far_x: config.far_x,
            center_y: config.center_y,
            window_width: config.window_width,
            window_height: config.window_height,
        }
    }

    pub fn center(&self, face: &BoundingBox, side: EyeSide) -> (i64, i64) {
        let fx = match side {
            EyeSide::Near => self.near_x,
            EyeSide::Far => self.far_x,
        };
        let cx = face.x1() as i64 + (fx * face.width() as f64) as i64;
        let cy = face.y1() as i64 + (self.center_y * face.height() as f64) as i64;
        (cx, cy)
    }

    /// The nominal window around the eye center, clamped to the frame.
    /// `None` when nothing of it lies inside the frame.
    pub fn window(
        &self,
        face: &BoundingBox,
        side: EyeSide,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<CropWindow> {
        let (cx, cy) = self.center(face, side);
        let half_w = (self.window_width / 2) as i64;
        let half_h = (self.window_height / 2) as i64;

        let x1 = (cx - half_w).max(0);
        let y1 = (cy - half_h).max(0);
        let x2 = (cx + half_w).min(frame_width as i64);
        let y2 = (cy + half_h).min(frame_height as i64);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(CropWindow {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }

    /// Crops both eyes. A side whose window has zero area is skipped for this frame.
    pub fn derive(&self, frame: &RgbImage, face: &BoundingBox) -> Vec<EyeRegion> {
        EyeSide::BOTH
            .iter()
            .filter_map(|&side| {
                let win = self.window(face, side, frame.width(), frame.height())?;
                let image =
                    image::imageops::crop_imm(frame, win.x, win.y, win.width, win.height)
                        .to_image();
                Some(EyeRegion {
                    side,
                    origin: (win.x, win.y),
                    image,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x1: i32, y1: i32, x2: i32, y2: i32) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2).unwrap()
    }

    #[test]
    fn interior_face_gets_full_windows_at_fixed_fractions() {
        let geometry = EyeGeometry::default();
        let f = face(100, 100, 300, 340);

        assert_eq!(geometry.center(&f, EyeSide::Near), (160, 184));
        assert_eq!(geometry.center(&f, EyeSide::Far), (240, 184));

        let win = geometry.window(&f, EyeSide::Near, 640, 480).unwrap();
        assert_eq!(win, CropWindow { x: 130, y: 166, width: 60, height: 36 });
    }

    #[test]
    fn centers_truncate_the_double_precision_product() {
        let geometry = EyeGeometry::default();

        // 0.7 * 90 is 62.99999999999999 in double precision, but rounds up to 63 in single
        assert_eq!(geometry.center(&face(0, 0, 90, 60), EyeSide::Far), (62, 21));
        assert_eq!(geometry.center(&face(10, 0, 180, 60), EyeSide::Far).0, 10 + 118);
        assert_eq!(geometry.center(&face(0, 0, 180, 60), EyeSide::Far).0, 125);
        assert_eq!(geometry.center(&face(5, 0, 35, 60), EyeSide::Near).0, 5 + 9);
    }

    #[test]
    fn left_edge_face_is_clamped_not_read_out_of_bounds() {
        let geometry = EyeGeometry::default();
        let frame = RgbImage::new(320, 240);
        let f = face(0, 20, 40, 80);

        let regions = geometry.derive(&frame, &f);
        let near = regions.iter().find(|r| r.side == EyeSide::Near).unwrap();
        assert_eq!(near.origin.0, 0);
        assert!(near.width() < geometry.window_width);
        assert_eq!(near.width(), 12 + 30);
    }

    #[test]
    fn window_outside_the_frame_is_dropped() {
        let geometry = EyeGeometry::default();
        // Face hanging off the right of a narrow frame: the far eye center lands past the edge
        let f = face(100, 0, 400, 100);
        assert!(geometry.window(&f, EyeSide::Far, 200, 100).is_none());
        assert!(geometry.window(&f, EyeSide::Near, 200, 100).is_some());
        assert_eq!(geometry.derive(&RgbImage::new(200, 100), &f).len(), 1);
    }

    #[test]
    fn tiny_frame_yields_no_regions_instead_of_panicking() {
        let geometry = EyeGeometry::default();
        let f = face(0, 0, 1, 1);
        let regions = geometry.derive(&RgbImage::new(1, 1), &f);
        assert!(regions.iter().all(|r| r.width() > 0 && r.height() > 0));
    }

    #[test]
    fn local_points_map_inside_face_box_extended_by_window_margin() {
        let geometry = EyeGeometry::default();
        let frame = RgbImage::new(640, 480);
        let boxes = [
            face(0, 0, 40, 30),
            face(10, 400, 200, 480),
            face(600, 5, 640, 60),
            face(250, 150, 251, 151),
            face(100, 100, 500, 460),
        ];
        let half_w = (geometry.window_width / 2) as f32;
        let half_h = (geometry.window_height / 2) as f32;

        for f in boxes {
            for region in geometry.derive(&frame, &f) {
                let corners = [
                    PupilEstimate { x: 0.0, y: 0.0 },
                    PupilEstimate {
                        x: region.width() as f32 - 0.001,
                        y: region.height() as f32 - 0.001,
                    },
                ];
                for local in corners {
                    let p = region.to_frame(&local);
                    assert!(p.x >= f.x1() as f32 - half_w && p.x < f.x2() as f32 + half_w);
                    assert!(p.y >= f.y1() as f32 - half_h && p.y < f.y2() as f32 + half_h);
                }
            }
        }
    }
}
