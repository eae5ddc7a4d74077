//! Pupil centroid from an eye crop.
//!
//! The pupil is taken to be the largest dark blob: intensity, blur, inverted Otsu
//! threshold, outer contours, then the centroid of the biggest contour from its
//! polygon moments. Heavy lash or shadow occlusion breaks that assumption.

use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::gaussian_blur_f32;
use imageproc::point::Point;
use std::cmp::Ordering;

use crate::config::PupilConfig;
use crate::types::PupilEstimate;

#[derive(Debug, Clone, Copy)]
pub struct PupilLocalizer {
    blur_sigma: f32,
}

impl Default for PupilLocalizer {
    fn default() -> Self {
        Self::from_config(&PupilConfig::default())
    }
}

impl PupilLocalizer {
    pub fn new(blur_sigma: f32) -> Self {
        Self { blur_sigma }
    }

    pub fn from_config(config: &PupilConfig) -> Self {
        Self::new(config.blur_sigma)
    }

    /// Region-local sub-pixel centroid of the pupil, or `None` when no dark blob is found.
    pub fn locate(&self, eye: &RgbImage) -> Option<PupilEstimate> {
        if eye.width() == 0 || eye.height() == 0 {
            return None;
        }
        let gray = intensity(eye);
        let blurred = gaussian_blur_f32(&gray, self.blur_sigma);
        let mask = dark_mask(&blurred);
        largest_blob_centroid(&mask)
    }
}

/// BT.601 luma, the weighting camera pipelines use for BGR/RGB to gray.
pub fn intensity(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y);
        let luma = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// Foreground (255) where the image is at or below its Otsu level.
///
/// A uniform patch has level 0, so it is all background unless it is black.
pub fn dark_mask(gray: &GrayImage) -> GrayImage {
    threshold(gray, otsu_level(gray), ThresholdType::BinaryInverted)
}

/// Centroid of the outer contour enclosing the largest area.
pub fn largest_blob_centroid(mask: &GrayImage) -> Option<PupilEstimate> {
    let contours = find_contours::<i32>(mask);
    let largest = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| PolygonMoments::of(&c.points))
        .max_by(|a, b| a.area().partial_cmp(&b.area()).unwrap_or(Ordering::Equal))?;
    largest.centroid()
}

/// Zeroth and first raw moments of a closed polygon (Green's theorem).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PolygonMoments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl PolygonMoments {
    pub fn of(points: &[Point<i32>]) -> Self {
        let Some(last) = points.last() else {
            return Self::default();
        };

        let (mut a00, mut a10, mut a01) = (0.0, 0.0, 0.0);
        let (mut xp, mut yp) = (last.x as f64, last.y as f64);
        for p in points {
            let (x, y) = (p.x as f64, p.y as f64);
            let cross = xp * y - x * yp;
            a00 += cross;
            a10 += cross * (xp + x);
            a01 += cross * (yp + y);
            xp = x;
            yp = y;
        }

        // Orientation-independent: a clockwise trace gives negative raw sums
        let sign = if a00 < 0.0 { -1.0 } else { 1.0 };
        Self {
            m00: sign * a00 / 2.0,
            m10: sign * a10 / 6.0,
            m01: sign * a01 / 6.0,
        }
    }

    pub fn area(&self) -> f64 {
        self.m00
    }

    pub fn centroid(&self) -> Option<PupilEstimate> {
        if self.m00 == 0.0 {
            return None;
        }
        Some(PupilEstimate {
            x: (self.m10 / self.m00) as f32,
            y: (self.m01 / self.m00) as f32,
        })
    }
}
