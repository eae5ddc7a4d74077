use clap::Parser;
use std::path::PathBuf;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (created with defaults if missing)
    #[arg(short, long, default_value = AppConfig::DEFAULT_PATH)]
    pub config: PathBuf,

    /// Camera index (overrides config)
    #[arg(long)]
    pub cam_index: Option<u32>,

    /// Mirror the camera frames horizontally
    #[arg(long)]
    pub mirror: bool,

    /// Replay frames from a directory of images instead of a camera
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// Websocket bind address (overrides config)
    #[arg(long)]
    pub bind: Option<String>,

    /// List available cameras and exit
    #[arg(long)]
    pub list: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Show a preview window with face boxes and landmarks
    #[cfg(feature = "preview")]
    #[arg(long)]
    pub preview: bool,
}

impl Args {
    /// Applies command-line overrides on top of the file configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(index) = self.cam_index {
            config.camera.index = index;
        }
        if self.mirror {
            config.camera.mirror = true;
        }
        if let Some(dir) = &self.replay {
            config.camera.replay_dir = Some(dir.clone());
        }
        if let Some(bind) = &self.bind {
            config.stream.bind = bind.clone();
        }
    }
}
