use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gazecast::args::Args;
use gazecast::camera::{list_cameras, CameraSource, FrameSource, ImageDirSource};
use gazecast::config::{AppConfig, StreamConfig};
use gazecast::detector::load_detector;
use gazecast::eye_region::EyeGeometry;
use gazecast::gaze::{GazeEstimator, OnnxGazeModel};
use gazecast::head_pose::WhenetHeadPose;
use gazecast::landmarks::FaceMeshPredictor;
use gazecast::pipeline::CaptureLoop;
use gazecast::publish;
use gazecast::pupil::PupilLocalizer;
use gazecast::state::{self, GazeState, GazeStateReader};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    if args.list {
        return print_cameras();
    }

    info!("Starting {} v{}", gazecast::NAME, gazecast::VERSION);

    let mut config = AppConfig::load(&args.config)?;
    args.apply(&mut config);
    config.validate()?;

    // Models load before anything else starts; a missing file ends the process here
    let detector = load_detector(&config.models.detector, &config.detection)?;
    let face_mesh = config
        .models
        .face_mesh_path
        .as_deref()
        .map(FaceMeshPredictor::new)
        .transpose()?;
    let head_pose = config
        .models
        .head_pose_path
        .as_deref()
        .map(WhenetHeadPose::new)
        .transpose()?;
    let gaze_model = config
        .models
        .gaze_path
        .as_deref()
        .map(OnnxGazeModel::new)
        .transpose()?;

    let (source, frame_size): (Box<dyn FrameSource>, (u32, u32)) = match &config.camera.replay_dir {
        Some(dir) => {
            let replay = ImageDirSource::new(dir, config.camera.mirror)?;
            let size = replay.frame_size()?;
            (Box::new(replay), size)
        }
        None => {
            let camera = CameraSource::new(config.camera.index, config.camera.mirror)?;
            let size = (camera.width(), camera.height());
            (Box::new(camera), size)
        }
    };
    info!(source = %source.name(), width = frame_size.0, height = frame_size.1, "Frame source ready");

    let listener = std::net::TcpListener::bind(&config.stream.bind)
        .with_context(|| format!("Failed to bind {}", config.stream.bind))?;
    listener.set_nonblocking(true)?;

    let (writer, reader) =
        state::channel(GazeState::neutral(config.eyes.window_width, config.eyes.window_height));
    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_publisher(listener, reader, config.stream.clone(), Arc::clone(&shutdown))?;

    let mut capture = CaptureLoop::new(source, detector, writer)
        .with_geometry(EyeGeometry::from_config(&config.eyes))
        .with_localizer(PupilLocalizer::from_config(&config.pupil))
        .with_landmark_every(config.eyes.landmark_every)
        .with_shutdown(shutdown);
    if let Some(mesh) = face_mesh {
        capture = capture.with_landmarks(Box::new(mesh));
    }
    if let Some(pose) = head_pose {
        capture = capture.with_head_pose(Box::new(pose));
    }
    if let Some(model) = gaze_model {
        capture = capture.with_gaze(GazeEstimator::new(
            Box::new(model),
            config.eyes.window_width,
            config.eyes.window_height,
        ));
    }

    #[cfg(feature = "preview")]
    if args.preview {
        let window = gazecast::output::WindowOutput::new(
            "gazecast",
            frame_size.0 as usize,
            frame_size.1 as usize,
        )?;
        capture = capture.with_sink(Box::new(window));
    }

    // Blocking; the camera stays on this thread
    let reason = capture.run()?;
    info!(?reason, "Shutting down");
    Ok(())
}

/// Runs the publisher on its own thread with a single-threaded runtime. Ctrl-C and a
/// publisher failure both raise `shutdown` so the capture loop stops as well.
fn spawn_publisher(
    listener: std::net::TcpListener,
    reader: GazeStateReader,
    stream: StreamConfig,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("publisher".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let ctrl_c_flag = Arc::clone(&shutdown);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Ctrl-C received");
                        ctrl_c_flag.store(true, Ordering::SeqCst);
                    }
                });

                let result = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => publish::serve(listener, reader, &stream).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = result {
                    error!(error = %e, "Publisher stopped");
                    shutdown.store(true, Ordering::SeqCst);
                }
            });
        })?;
    Ok(())
}

fn print_cameras() -> anyhow::Result<()> {
    let cameras = list_cameras()?;
    println!("{}", "Available Cameras:".bold());
    println!("{:<5} | {:<30} | {:<10}", "Index", "Name", "Misc");
    println!("{}", "-".repeat(60));
    for cam in cameras {
        println!(
            "{:<5} | {:<30} | {}",
            cam.index().to_string().cyan(),
            cam.human_name().green(),
            cam.misc()
        );
    }
    Ok(())
}
