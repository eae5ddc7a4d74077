//! gazecast - real-time pupil and gaze estimation from a camera feed
//!
//! A blocking capture loop turns frames into a gaze measurement:
//! - face detection, then two heuristic eye windows per face
//! - pupil centroid per eye (Otsu threshold, largest dark contour, image moments)
//! - optional neural gaze direction from both eyes and head pose
//!
//! The latest measurement lives in a shared [`state::GazeState`] that a fixed-tick
//! publisher streams to websocket subscribers as JSON.

pub mod args;
pub mod camera;
pub mod config;
pub mod detector;
pub mod error;
pub mod eye_region;
pub mod gaze;
pub mod head_pose;
pub mod inference;
pub mod landmarks;
pub mod output;
pub mod pipeline;
pub mod publish;
pub mod pupil;
pub mod state;
pub mod types;

pub use config::AppConfig;
pub use error::{GazeError, Result};

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
