use image::{Rgb, RgbImage};

use crate::error::Result;
use crate::types::{Detection, Point2};

/// What the capture loop knows about a frame, for display.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    pub faces: Vec<Detection>,
    /// Eye-corner landmarks, when a predictor produced them this frame.
    pub markers: Vec<Point2>,
    /// Pupils in frame coordinates.
    pub pupils: Vec<Point2>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Open,
    /// The viewer asked to stop (window closed or ESC).
    Closed,
}

/// Debug display collaborator for the capture loop.
pub trait FrameSink {
    fn present(&mut self, frame: &RgbImage, annotations: &Annotations) -> Result<SinkStatus>;
}

/// Headless operation: frames go nowhere and the sink never closes.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _frame: &RgbImage, _annotations: &Annotations) -> Result<SinkStatus> {
        Ok(SinkStatus::Open)
    }
}

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const MARKER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const PUPIL_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Copy of `frame` with face boxes, landmark markers and pupils drawn on.
pub fn draw_annotations(frame: &RgbImage, annotations: &Annotations) -> RgbImage {
    use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
    use imageproc::rect::Rect;

    let mut canvas = frame.clone();
    for face in &annotations.faces {
        let b = face.bbox;
        let rect = Rect::at(b.x1(), b.y1()).of_size(b.width() as u32, b.height() as u32);
        draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
        // Two pixels thick
        if b.width() > 2 && b.height() > 2 {
            let inner =
                Rect::at(b.x1() + 1, b.y1() + 1).of_size(b.width() as u32 - 2, b.height() as u32 - 2);
            draw_hollow_rect_mut(&mut canvas, inner, BOX_COLOR);
        }
    }
    for p in &annotations.markers {
        draw_filled_circle_mut(&mut canvas, (p.x as i32, p.y as i32), 2, MARKER_COLOR);
    }
    for p in &annotations.pupils {
        draw_filled_circle_mut(&mut canvas, (p.x as i32, p.y as i32), 2, PUPIL_COLOR);
    }
    canvas
}

#[cfg(feature = "preview")]
pub use window::WindowOutput;

#[cfg(feature = "preview")]
mod window {
    use super::*;
    use crate::error::GazeError;

    pub struct WindowOutput {
        window: minifb::Window,
        buffer: Vec<u32>,
        width: usize,
        height: usize,
    }

    impl WindowOutput {
        pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
            let mut window = minifb::Window::new(
                title,
                width,
                height,
                minifb::WindowOptions {
                    resize: true,
                    ..minifb::WindowOptions::default()
                },
            )
            .map_err(|e| GazeError::Display(format!("failed to create window: {}", e)))?;

            window.limit_update_rate(Some(std::time::Duration::from_micros(16600))); // ~60 FPS

            Ok(Self {
                window,
                buffer: vec![0; width * height],
                width,
                height,
            })
        }
    }

    impl FrameSink for WindowOutput {
        fn present(&mut self, frame: &RgbImage, annotations: &Annotations) -> Result<SinkStatus> {
            if !self.window.is_open() || self.window.is_key_down(minifb::Key::Escape) {
                return Ok(SinkStatus::Closed);
            }

            let canvas = draw_annotations(frame, annotations);
            self.width = canvas.width() as usize;
            self.height = canvas.height() as usize;
            self.buffer.resize(self.width * self.height, 0);

            // RGB8 -> 0RGB
            for (dst, px) in self.buffer.iter_mut().zip(canvas.pixels()) {
                *dst = (px[0] as u32) << 16 | (px[1] as u32) << 8 | px[2] as u32;
            }

            self.window
                .update_with_buffer(&self.buffer, self.width, self.height)
                .map_err(|e| GazeError::Display(format!("window update failed: {}", e)))?;
            Ok(SinkStatus::Open)
        }
    }
}
