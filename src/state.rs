//! The single published gaze record and the handle pair that shares it.
//!
//! Writes replace the whole record; readers copy out a complete snapshot. There is
//! exactly one writer (the capture loop) and any number of readers.

use tokio::sync::watch;

use crate::types::{GazeVector, PupilEstimate};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeState {
    /// Pupil centroid local to the eye window.
    pub pupil: PupilEstimate,
    /// Frame position of the eye window that produced `pupil`.
    pub origin: (u32, u32),
    pub eye_w: u32,
    pub eye_h: u32,
    /// In [0, 1]. Zero until the first measurement.
    pub confidence: f32,
    pub gaze: Option<GazeVector>,
    pub distance_cm: Option<f32>,
    pub frame_id: u64,
}

impl GazeState {
    /// Zero coordinates and zero confidence, sized to the nominal eye window.
    pub fn neutral(eye_w: u32, eye_h: u32) -> Self {
        Self {
            pupil: PupilEstimate::default(),
            origin: (0, 0),
            eye_w,
            eye_h,
            confidence: 0.0,
            gaze: None,
            distance_cm: None,
            frame_id: 0,
        }
    }
}

impl Default for GazeState {
    fn default() -> Self {
        Self::neutral(60, 36)
    }
}

/// Creates the shared state, initialised to `initial`.
pub fn channel(initial: GazeState) -> (GazeStateWriter, GazeStateReader) {
    let (tx, rx) = watch::channel(initial);
    (GazeStateWriter { tx }, GazeStateReader { rx })
}

/// The only handle that can change the state. Not `Clone`.
#[derive(Debug)]
pub struct GazeStateWriter {
    tx: watch::Sender<GazeState>,
}

impl GazeStateWriter {
    /// Replaces the whole record. Succeeds whether or not anyone is reading.
    pub fn publish(&self, state: GazeState) {
        self.tx.send_replace(state);
    }

    pub fn snapshot(&self) -> GazeState {
        *self.tx.borrow()
    }

    pub fn reader(&self) -> GazeStateReader {
        GazeStateReader {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GazeStateReader {
    rx: watch::Receiver<GazeState>,
}

impl GazeStateReader {
    /// A copy of the latest complete record. Never blocks on the writer beyond the copy.
    pub fn snapshot(&self) -> GazeState {
        *self.rx.borrow()
    }
}
