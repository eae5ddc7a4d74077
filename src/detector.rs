use image::{imageops::FilterType, Rgb, RgbImage};
use ort::session::Session;
use ort::value::Tensor;
use std::cmp::Ordering;
use std::path::Path;

use crate::config::{DetectionConfig, DetectorKind, DetectorModel};
use crate::error::{GazeError, Result};
use crate::inference::{load_session, pack_nchw};
use crate::types::{BoundingBox, Detection};

/// Finds faces in a frame. Every returned detection scores at least the configured confidence.
pub trait FaceDetector {
    fn name(&self) -> String;
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;
}

pub fn load_detector(
    model: &DetectorModel,
    detection: &DetectionConfig,
) -> Result<Box<dyn FaceDetector>> {
    Ok(match model.kind {
        DetectorKind::Yolo => Box::new(YoloFaceDetector::new(&model.path, detection)?),
        DetectorKind::UltraFace => Box::new(UltraFaceDetector::new(&model.path, detection)?),
    })
}

/// Greedy IoU suppression, highest score first.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

/// Clamps model-space corners to the frame and builds a detection, dropping empty boxes.
fn clamped_detection(
    corners: [f32; 4],
    score: f32,
    frame_w: u32,
    frame_h: u32,
) -> Option<Detection> {
    let [x1, y1, x2, y2] = corners;
    let (fw, fh) = (frame_w as f32, frame_h as f32);
    BoundingBox::from_corners(
        x1.clamp(0.0, fw),
        y1.clamp(0.0, fh),
        x2.clamp(0.0, fw),
        y2.clamp(0.0, fh),
    )
    .map(|bbox| Detection { bbox, score })
}

// =========================================================================
// YOLO face (ultralytics export)
// =========================================================================

/// How a frame was fitted into the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

pub fn letterbox(frame: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (w, h) = frame.dimensions();
    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);

    let resized = image::imageops::resize(frame, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([114, 114, 114]));
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;
    image::imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Decodes a `[1, 4 + classes, candidates]` output (cx, cy, w, h, class scores...).
pub fn decode_yolo(
    raw: &[f32],
    attrs: usize,
    candidates: usize,
    threshold: f32,
    letterbox: &Letterbox,
    frame_w: u32,
    frame_h: u32,
) -> Vec<Detection> {
    if attrs < 5 || raw.len() < attrs * candidates {
        return Vec::new();
    }
    let at = |attr: usize, i: usize| raw[attr * candidates + i];

    let mut detections = Vec::new();
    for i in 0..candidates {
        let score = (4..attrs).map(|a| at(a, i)).fold(f32::NEG_INFINITY, f32::max);
        if score < threshold {
            continue;
        }
        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let (x1, y1) = letterbox.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_frame(cx + w / 2.0, cy + h / 2.0);
        if let Some(det) = clamped_detection([x1, y1, x2, y2], score, frame_w, frame_h) {
            detections.push(det);
        }
    }
    detections
}

pub struct YoloFaceDetector {
    session: Session,
    input_size: u32,
    confidence: f32,
    iou_threshold: f32,
}

impl YoloFaceDetector {
    pub fn new(model_path: &Path, config: &DetectionConfig) -> Result<Self> {
        Ok(Self {
            session: load_session(model_path)?,
            input_size: config.input_size,
            confidence: config.confidence,
            iou_threshold: config.iou_threshold,
        })
    }
}

impl FaceDetector for YoloFaceDetector {
    fn name(&self) -> String {
        format!("YOLO face ({}px)", self.input_size)
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let (canvas, lb) = letterbox(frame, self.input_size);
        let input_data = pack_nchw(&canvas, |_, v| v as f32 / 255.0);

        let size = self.input_size as i64;
        let input = Tensor::from_array((vec![1i64, 3, size, size], input_data))?;
        let outputs = self.session.run(ort::inputs![input])?;

        let (shape, raw) = outputs[0].try_extract_tensor::<f32>()?;
        if shape.len() != 3 {
            return Err(GazeError::ModelOutput(format!(
                "YOLO output rank {} (expected 3)",
                shape.len()
            )));
        }
        let attrs = shape[1] as usize;
        let candidates = shape[2] as usize;

        let detections = decode_yolo(
            raw,
            attrs,
            candidates,
            self.confidence,
            &lb,
            frame.width(),
            frame.height(),
        );
        Ok(non_max_suppression(detections, self.iou_threshold))
    }
}

// =========================================================================
// UltraFace (RFB-320)
// =========================================================================

const ULTRAFACE_W: u32 = 320;
const ULTRAFACE_H: u32 = 240;

pub struct UltraFaceDetector {
    session: Session,
    anchors: Vec<(f32, f32, f32, f32)>, // cx, cy, w, h
    confidence: f32,
    iou_threshold: f32,
}

impl UltraFaceDetector {
    pub fn new(model_path: &Path, config: &DetectionConfig) -> Result<Self> {
        Ok(Self {
            session: load_session(model_path)?,
            anchors: generate_anchors(ULTRAFACE_W as usize, ULTRAFACE_H as usize),
            confidence: config.confidence,
            iou_threshold: config.iou_threshold,
        })
    }

    /// Decodes every anchor above `threshold` into frame coordinates.
    fn decode(
        anchors: &[(f32, f32, f32, f32)],
        scores_raw: &[f32],
        boxes_raw: &[f32],
        threshold: f32,
        frame_w: u32,
        frame_h: u32,
    ) -> Vec<Detection> {
        let center_variance = 0.1;
        let size_variance = 0.2;
        let (fw, fh) = (frame_w as f32, frame_h as f32);

        let count = anchors
            .len()
            .min(scores_raw.len() / 2)
            .min(boxes_raw.len() / 4);

        let mut detections = Vec::new();
        for (i, &(ax, ay, aw, ah)) in anchors.iter().enumerate().take(count) {
            let score = scores_raw[i * 2 + 1];
            if score < threshold {
                continue;
            }
            let cx = boxes_raw[i * 4] * center_variance * aw + ax;
            let cy = boxes_raw[i * 4 + 1] * center_variance * ah + ay;
            let w = (boxes_raw[i * 4 + 2] * size_variance).exp() * aw;
            let h = (boxes_raw[i * 4 + 3] * size_variance).exp() * ah;

            // Anchors are normalized, so the frame size scales them directly
            let corners = [
                (cx - w / 2.0) * fw,
                (cy - h / 2.0) * fh,
                (cx + w / 2.0) * fw,
                (cy + h / 2.0) * fh,
            ];
            if let Some(det) = clamped_detection(corners, score, frame_w, frame_h) {
                detections.push(det);
            }
        }
        detections
    }
}

impl FaceDetector for UltraFaceDetector {
    fn name(&self) -> String {
        "UltraFace (RFB-320)".to_string()
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let resized =
            image::imageops::resize(frame, ULTRAFACE_W, ULTRAFACE_H, FilterType::Triangle);
        let input_data = pack_nchw(&resized, |_, v| (v as f32 - 127.0) / 128.0);

        let input = Tensor::from_array((
            vec![1i64, 3, ULTRAFACE_H as i64, ULTRAFACE_W as i64],
            input_data,
        ))?;
        let outputs = self.session.run(ort::inputs![input])?;

        let (_, scores) = outputs["scores"].try_extract_tensor::<f32>()?;
        let (_, boxes) = outputs["boxes"].try_extract_tensor::<f32>()?;

        let detections = Self::decode(
            &self.anchors,
            scores,
            boxes,
            self.confidence,
            frame.width(),
            frame.height(),
        );
        Ok(non_max_suppression(detections, self.iou_threshold))
    }
}

fn generate_anchors(width: usize, height: usize) -> Vec<(f32, f32, f32, f32)> {
    let shrinkage_list = [8, 16, 32, 64];
    let min_boxes: [&[f32]; 4] = [&[10.0, 16.0, 24.0], &[32.0, 48.0], &[64.0, 96.0], &[128.0, 192.0, 256.0]];

    let w = width as f32;
    let h = height as f32;

    let mut anchors = Vec::new();
    for (&shrinkage, boxes) in shrinkage_list.iter().zip(min_boxes) {
        let step = shrinkage as f32;
        let feature_h = (h / step).ceil() as usize;
        let feature_w = (w / step).ceil() as usize;

        for v in 0..feature_h {
            for u in 0..feature_w {
                let cx = (u as f32 * step + step / 2.0) / w;
                let cy = (v as f32 * step + step / 2.0) / h;
                for &min_box in boxes {
                    anchors.push((cx, cy, min_box / w, min_box / h));
                }
            }
        }
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: i32, y1: i32, x2: i32, y2: i32, score: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x1, y1, x2, y2).unwrap(),
            score,
        }
    }

    #[test]
    fn nms_keeps_best_of_overlapping_faces() {
        let kept = non_max_suppression(
            vec![
                det(0, 0, 100, 100, 0.6),
                det(5, 5, 105, 105, 0.9),
                det(300, 300, 380, 380, 0.7),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.7);
    }

    #[test]
    fn letterbox_pads_the_short_side() {
        let frame = RgbImage::new(640, 320);
        let (canvas, lb) = letterbox(&frame, 320);
        assert_eq!(canvas.dimensions(), (320, 320));
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
        assert_eq!(lb.to_frame(160.0, 160.0), (320.0, 160.0));
    }

    #[test]
    fn yolo_decoding_maps_back_through_letterbox_and_filters() {
        let lb = Letterbox { scale: 0.5, pad_x: 0.0, pad_y: 80.0 };
        // Two candidates laid out attribute-major: cx, cy, w, h, score
        let raw = vec![
            100.0, 10.0, // cx
            180.0, 10.0, // cy
            40.0, 4.0, // w
            60.0, 4.0, // h
            0.8, 0.2, // face score
        ];
        let dets = decode_yolo(&raw, 5, 2, 0.5, &lb, 640, 320);
        assert_eq!(dets.len(), 1);
        let b = dets[0].bbox;
        assert_eq!((b.x1(), b.y1(), b.x2(), b.y2()), (160, 140, 240, 260));
        assert_eq!(dets[0].score, 0.8);
    }

    #[test]
    fn yolo_boxes_are_clamped_to_the_frame() {
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let raw = vec![5.0, 5.0, 20.0, 20.0, 0.9];
        let dets = decode_yolo(&raw, 5, 1, 0.5, &lb, 100, 100);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox.x1(), 0);
        assert_eq!(dets[0].bbox.y1(), 0);
    }

    #[test]
    fn ultraface_anchor_count_matches_rfb320() {
        assert_eq!(generate_anchors(320, 240).len(), 4420);
    }

    #[test]
    fn ultraface_decodes_anchor_centered_box() {
        let anchors = vec![(0.5, 0.5, 0.25, 0.25)];
        let scores = vec![0.1, 0.95];
        let boxes = vec![0.0, 0.0, 0.0, 0.0];
        let dets = UltraFaceDetector::decode(&anchors, &scores, &boxes, 0.5, 400, 200);
        assert_eq!(dets.len(), 1);
        let b = dets[0].bbox;
        assert_eq!((b.x1(), b.y1(), b.x2(), b.y2()), (150, 75, 250, 125));
    }
}
