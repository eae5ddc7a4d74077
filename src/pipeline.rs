//! The capture loop: frames in, gaze state out.
//!
//! Owns the frame source and every model handle, and runs blocking on the thread that
//! created them. The only thing it shares is the [`GazeStateWriter`].

use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::camera::FrameSource;
use crate::detector::FaceDetector;
use crate::error::Result;
use crate::eye_region::{EyeGeometry, EyeRegion, EyeSide};
use crate::gaze::GazeEstimator;
use crate::head_pose::HeadPoseEstimator;
use crate::landmarks::{eye_corner_markers, viewer_distance_cm, LandmarkPredictor};
use crate::output::{Annotations, FrameSink, NullSink, SinkStatus};
use crate::pupil::PupilLocalizer;
use crate::state::{GazeState, GazeStateWriter};
use crate::types::{Detection, GazeVector};

/// Why [`CaptureLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The frame source failed to deliver a frame.
    CameraUnavailable,
    /// The frame source ran out of frames.
    EndOfStream,
    /// The process-level shutdown flag was raised.
    Shutdown,
    /// The display sink was closed by the viewer.
    SinkClosed,
}

/// Outcome of one frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub frame_id: u64,
    /// Whether the eye pipeline ran on this frame.
    pub refreshed: bool,
    /// Number of GazeState writes made for this frame.
    pub writes: usize,
    pub annotations: Annotations,
}

pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    detector: Box<dyn FaceDetector>,
    landmarks: Option<Box<dyn LandmarkPredictor>>,
    head_pose: Option<Box<dyn HeadPoseEstimator>>,
    gaze: Option<GazeEstimator>,
    geometry: EyeGeometry,
    localizer: PupilLocalizer,
    writer: GazeStateWriter,
    sink: Box<dyn FrameSink>,
    shutdown: Arc<AtomicBool>,
    landmark_every: u64,
    frame_id: u64,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn FaceDetector>,
        writer: GazeStateWriter,
    ) -> Self {
        Self {
            source,
            detector,
            landmarks: None,
            head_pose: None,
            gaze: None,
            geometry: EyeGeometry::default(),
            localizer: PupilLocalizer::default(),
            writer,
            sink: Box::new(NullSink),
            shutdown: Arc::new(AtomicBool::new(false)),
            landmark_every: 3,
            frame_id: 0,
        }
    }

    pub fn with_landmarks(mut self, predictor: Box<dyn LandmarkPredictor>) -> Self {
        self.landmarks = Some(predictor);
        self
    }

    pub fn with_head_pose(mut self, estimator: Box<dyn HeadPoseEstimator>) -> Self {
        self.head_pose = Some(estimator);
        self
    }

    pub fn with_gaze(mut self, estimator: GazeEstimator) -> Self {
        self.gaze = Some(estimator);
        self
    }

    pub fn with_geometry(mut self, geometry: EyeGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_localizer(mut self, localizer: PupilLocalizer) -> Self {
        self.localizer = localizer;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    /// Run the eye pipeline on every `n`th frame only. Zero is treated as one.
    pub fn with_landmark_every(mut self, n: u64) -> Self {
        self.landmark_every = n.max(1);
        self
    }

    /// Pulls frames until the source fails or runs dry, the sink closes, or shutdown
    /// is requested. Model failures are returned as errors. Consumes the loop so the
    /// camera and model handles are released on return.
    pub fn run(mut self) -> Result<StopReason> {
        info!(
            source = %self.source.name(),
            detector = %self.detector.name(),
            landmarks = ?self.landmarks.as_ref().map(|l| l.name()),
            gaze = ?self.gaze.as_ref().map(|g| g.name()),
            "Capture loop started"
        );

        let reason = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break StopReason::Shutdown;
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break StopReason::EndOfStream,
                Err(e) => {
                    warn!(error = %e, "Frame read failed");
                    break StopReason::CameraUnavailable;
                }
            };

            let report = self.process_frame(&frame)?;
            debug!(
                frame = report.frame_id,
                faces = report.annotations.faces.len(),
                refreshed = report.refreshed,
                writes = report.writes,
                "Frame processed"
            );

            if self.sink.present(&frame, &report.annotations)? == SinkStatus::Closed {
                break StopReason::SinkClosed;
            }
        };

        info!(?reason, frames = self.frame_id, "Capture loop stopped");
        Ok(reason)
    }

    /// Detects faces and, on refresh frames, runs the eye pipeline for each of them.
    pub fn process_frame(&mut self, frame: &RgbImage) -> Result<FrameReport> {
        let faces = self.detector.detect(frame)?;
        let mut report = FrameReport {
            frame_id: self.frame_id,
            refreshed: self.frame_id % self.landmark_every == 0,
            ..Default::default()
        };

        if report.refreshed {
            for face in &faces {
                self.process_face(frame, face, &mut report)?;
            }
        }

        report.annotations.faces = faces;
        self.frame_id += 1;
        Ok(report)
    }

    fn process_face(
        &mut self,
        frame: &RgbImage,
        face: &Detection,
        report: &mut FrameReport,
    ) -> Result<()> {
        let landmarks = match self.landmarks.as_mut() {
            Some(predictor) => {
                let landmarks = predictor.predict(frame, &face.bbox)?;
                if landmarks.is_none() {
                    debug!(frame = self.frame_id, "Landmarks unavailable for face");
                }
                landmarks
            }
            None => None,
        };
        if let Some(lm) = &landmarks {
            report.annotations.markers.extend(eye_corner_markers(lm));
        }
        let distance_cm = landmarks.as_ref().and_then(viewer_distance_cm);

        let regions = self.geometry.derive(frame, &face.bbox);
        let gaze = self.estimate_gaze(frame, face, &regions)?;
        let confidence = face.score.clamp(0.0, 1.0);

        let mut wrote = false;
        for region in &regions {
            let Some(pupil) = self.localizer.locate(&region.image) else {
                continue;
            };
            let previous = self.writer.snapshot();
            self.writer.publish(GazeState {
                pupil,
                origin: region.origin,
                eye_w: region.width(),
                eye_h: region.height(),
                confidence,
                gaze: gaze.or(previous.gaze),
                distance_cm: distance_cm.or(previous.distance_cm),
                frame_id: self.frame_id,
            });
            report.annotations.pupils.push(region.to_frame(&pupil));
            report.writes += 1;
            wrote = true;
        }

        // No pupil this frame: the pupil fields keep their previous values
        if !wrote && (gaze.is_some() || distance_cm.is_some()) {
            let previous = self.writer.snapshot();
            self.writer.publish(GazeState {
                gaze: gaze.or(previous.gaze),
                distance_cm: distance_cm.or(previous.distance_cm),
                frame_id: self.frame_id,
                ..previous
            });
            report.writes += 1;
        }
        Ok(())
    }

    /// Needs both eye crops. Head pose is neutral when no estimator is configured or
    /// it has no answer for this face.
    fn estimate_gaze(
        &mut self,
        frame: &RgbImage,
        face: &Detection,
        regions: &[EyeRegion],
    ) -> Result<Option<GazeVector>> {
        let Some(estimator) = self.gaze.as_mut() else {
            return Ok(None);
        };
        let near = regions.iter().find(|r| r.side == EyeSide::Near);
        let far = regions.iter().find(|r| r.side == EyeSide::Far);
        let (Some(near), Some(far)) = (near, far) else {
            return Ok(None);
        };

        let head_pose = match self.head_pose.as_mut() {
            Some(pose) => pose.estimate(frame, &face.bbox)?,
            None => None,
        };
        let pose_input = head_pose
            .map(|p| p.as_model_input())
            .unwrap_or([0.0; 3]);

        estimator.estimate(&near.image, &far.image, pose_input)
    }
}
