use image::{ImageReader, RgbImage};
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{ApiBackend, CameraIndex, CameraInfo, RequestedFormat, RequestedFormatType},
    Camera,
};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{GazeError, Result};

/// Where frames come from.
///
/// `Err` is a read failure and `Ok(None)` means no frame was returned; both end
/// the capture loop.
pub trait FrameSource {
    fn name(&self) -> String;
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

pub struct CameraSource {
    camera: Camera,
    mirror: bool,
}

impl CameraSource {
    pub fn new(index: u32, mirror: bool) -> Result<Self> {
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(index), requested)
            .map_err(|e| GazeError::CameraUnavailable(format!("camera {index}: {e}")))?;

        camera
            .open_stream()
            .map_err(|e| GazeError::CameraUnavailable(format!("open stream: {e}")))?;

        info!(
            camera = %camera.info().human_name(),
            format = %camera.camera_format(),
            "Opened camera"
        );

        Ok(Self { camera, mirror })
    }

    pub fn width(&self) -> u32 {
        self.camera.resolution().width()
    }

    pub fn height(&self) -> u32 {
        self.camera.resolution().height()
    }
}

impl FrameSource for CameraSource {
    fn name(&self) -> String {
        self.camera.info().human_name()
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| GazeError::CameraUnavailable(format!("read frame: {e}")))?;
        let mut frame = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| GazeError::CameraUnavailable(format!("decode frame: {e}")))?;

        if self.mirror {
            image::imageops::flip_horizontal_in_place(&mut frame);
        }
        Ok(Some(frame))
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        let _ = self.camera.stop_stream();
    }
}

pub fn list_cameras() -> Result<Vec<CameraInfo>> {
    nokhwa::query(ApiBackend::Auto).map_err(|e| GazeError::CameraUnavailable(e.to_string()))
}

/// Replays the images of a directory in file-name order.
pub struct ImageDirSource {
    dir: PathBuf,
    pending: VecDeque<PathBuf>,
    mirror: bool,
}

impl ImageDirSource {
    const EXTENSIONS: [&'static str; 4] = ["png", "jpg", "jpeg", "bmp"];

    pub fn new(dir: &Path, mirror: bool) -> Result<Self> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| Self::EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(GazeError::CameraUnavailable(format!(
                "no images in {}",
                dir.display()
            )));
        }
        info!(frames = files.len(), dir = %dir.display(), "Replaying image directory");

        Ok(Self {
            dir: dir.to_path_buf(),
            pending: files.into(),
            mirror,
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Dimensions of the next frame to be replayed, read from its header.
    pub fn frame_size(&self) -> Result<(u32, u32)> {
        let path = self.pending.front().ok_or_else(|| {
            GazeError::CameraUnavailable(format!("replay of {} is exhausted", self.dir.display()))
        })?;
        Ok(image::image_dimensions(path)?)
    }
}

impl FrameSource for ImageDirSource {
    fn name(&self) -> String {
        format!("replay:{}", self.dir.display())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        let mut frame = ImageReader::open(&path)?.decode()?.to_rgb8();
        if self.mirror {
            image::imageops::flip_horizontal_in_place(&mut frame);
        }
        Ok(Some(frame))
    }
}
