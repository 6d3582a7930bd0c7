use anyhow::{bail, Context, Result};
use backdrop::background::BackgroundMode;
use backdrop::capture::{CameraPosition, CaptureFactory, SessionPreset, StillImageFactory};
use backdrop::frame::{Mask, RgbaFrame};
use backdrop::orientation::{FixedOrientation, Rotation};
use backdrop::output::{OutputSink, V4L2Output};
use backdrop::pipeline::{Session, SessionConfig, SessionState, Stage};
use backdrop::segmentation::{MaskProvider, SegmentationQuality};
use clap::{Parser, ValueEnum};
use std::io::BufRead;
use std::sync::{Arc, Mutex};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index (front camera)
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Webcam device index used as the back camera
    #[arg(long)]
    back_device: Option<u32>,

    /// Use a still image as the camera instead of a webcam
    #[arg(long)]
    input_image: Option<String>,

    /// Camera to start with
    #[arg(long, value_enum, default_value_t = CameraArg::Front)]
    camera: CameraArg,

    /// Capture resolution preset
    #[arg(long, value_enum, default_value_t = PresetArg::High)]
    preset: PresetArg,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Path to segmentation model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model: Option<String>,

    /// Segmentation model input size
    #[arg(long, value_enum, default_value_t = QualityArg::Balanced)]
    quality: QualityArg,

    /// Initial background: none, blur:<radius>, color:#rrggbb[aa] or image:<path>
    #[arg(long, default_value = "none")]
    background: BackgroundMode,

    /// Fixed rotation applied to every frame, in degrees
    #[arg(long, default_value_t = 0)]
    rotation: i32,

    /// Show matte visualization (grayscale silhouette) instead of the composite
    #[arg(long)]
    show_matte: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CameraArg {
    Front,
    Back,
}

impl From<CameraArg> for CameraPosition {
    fn from(arg: CameraArg) -> Self {
        match arg {
            CameraArg::Front => Self::Front,
            CameraArg::Back => Self::Back,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PresetArg {
    Low,
    Medium,
    High,
    Hd720,
    Hd1080,
}

impl From<PresetArg> for SessionPreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Low => Self::Low,
            PresetArg::Medium => Self::Medium,
            PresetArg::High => Self::High,
            PresetArg::Hd720 => Self::Hd720,
            PresetArg::Hd1080 => Self::Hd1080,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum QualityArg {
    Fast,
    Balanced,
    Accurate,
}

impl From<QualityArg> for SegmentationQuality {
    fn from(arg: QualityArg) -> Self {
        match arg {
            QualityArg::Fast => Self::Fast,
            QualityArg::Balanced => Self::Balanced,
            QualityArg::Accurate => Self::Accurate,
        }
    }
}

/// Stands in for a model when none is configured. Only reached if a
/// compositing background slips through; the frame is then dropped.
struct NoModel;

impl MaskProvider for NoModel {
    fn segment(&mut self, _frame: &RgbaFrame) -> Result<Mask> {
        bail!("no segmentation model loaded")
    }

    fn name(&self) -> &str {
        "none"
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Backdrop starting");
    let preset = SessionPreset::from(args.preset);
    tracing::info!("Preset: {:?} {:?}", preset, preset.resolution());
    tracing::info!("Target FPS: {}", args.fps);

    let capture = build_capture(&args)?;
    let provider = build_provider(&args)?;
    let has_model = args.model.is_some();

    let config = SessionConfig {
        camera_position: args.camera.into(),
        segmentation_quality: args.quality.into(),
        preset,
    };
    let session = Session::new(config, provider, capture)
        .context("Failed to create session")?
        .with_orientation_source(Box::new(FixedOrientation(Rotation::from_degrees(
            args.rotation,
        ))))
        .with_matte_preview(args.show_matte && has_model);
    let session = Arc::new(session);

    // Initialize output
    let output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;
    let (width, height) = output.resolution();
    tracing::info!("Publishing {}x{} frames to {}", width, height, args.output_device);
    let output = Mutex::new(output);
    session.output_frame().subscribe(move |frame: &RgbaFrame| {
        let mut sink = output.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = sink.write_frame(frame) {
            tracing::warn!("Dropping output frame: {:#}", e);
        }
    });

    apply_background(&session, args.background.clone(), has_model);

    let status = session
        .request_permission_and_prepare()
        .context("Failed to spawn permission thread")?
        .join()
        .map_err(|_| anyhow::anyhow!("Permission thread panicked"))?;
    if session.state() != SessionState::Running {
        bail!("Session did not start (camera authorization: {:?})", status);
    }

    tracing::info!("Commands: bg <none|blur:r|color:#hex|image:path>, toggle, stop, start, stats, quit");
    run_commands(&session, has_model)?;

    session.stop();
    tracing::info!("Backdrop stopped");
    Ok(())
}

fn build_capture(args: &Args) -> Result<Arc<dyn CaptureFactory>> {
    match &args.input_image {
        Some(path) => Ok(Arc::new(StillImageFactory::from_path(path, args.fps)?)),
        None => webcam_factory(args),
    }
}

#[cfg(feature = "webcam")]
fn webcam_factory(args: &Args) -> Result<Arc<dyn CaptureFactory>> {
    tracing::info!(
        "Using webcam {} (back camera: {:?})",
        args.input_device,
        args.back_device
    );
    Ok(Arc::new(backdrop::capture::WebcamFactory::new(
        args.input_device,
        args.back_device,
        args.fps,
    )))
}

#[cfg(not(feature = "webcam"))]
fn webcam_factory(_args: &Args) -> Result<Arc<dyn CaptureFactory>> {
    bail!("Built without webcam support; pass --input-image to use a still image")
}

fn build_provider(args: &Args) -> Result<Box<dyn MaskProvider>> {
    match &args.model {
        Some(model_path) => load_model(model_path, args.quality.into()),
        None => {
            tracing::info!("Running in passthrough mode (no segmentation)");
            Ok(Box::new(NoModel))
        }
    }
}

#[cfg(feature = "onnx")]
fn load_model(model_path: &str, quality: SegmentationQuality) -> Result<Box<dyn MaskProvider>> {
    tracing::info!("Loading segmentation model from {}", model_path);
    let provider = backdrop::segmentation::create_default_provider(model_path, quality)
        .context("Failed to load segmentation model")?;
    tracing::info!("Segmentation model loaded successfully");
    Ok(provider)
}

#[cfg(not(feature = "onnx"))]
fn load_model(model_path: &str, _quality: SegmentationQuality) -> Result<Box<dyn MaskProvider>> {
    bail!("Built without ONNX support; cannot load {}", model_path)
}

fn apply_background(session: &Session, mode: BackgroundMode, has_model: bool) {
    if !has_model && !mode.is_passthrough() {
        tracing::warn!("Background {} needs a segmentation model; keeping none", mode.kind());
        return;
    }
    session.set_background(mode);
}

fn run_commands(session: &Session, has_model: bool) -> Result<()> {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read command")?;
        let (command, arg) = match line.trim().split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (line.trim(), ""),
        };

        match command {
            "" => {}
            "bg" => match arg.parse::<BackgroundMode>() {
                Ok(mode) => apply_background(session, mode, has_model),
                Err(e) => tracing::warn!("{}", e),
            },
            "toggle" => match session.toggle_camera() {
                Ok(position) => tracing::info!("Now using {:?} camera", position),
                Err(e) => tracing::warn!("Camera switch failed: {}", e),
            },
            "stop" => session.stop(),
            "start" => {
                if let Err(e) = session.start() {
                    tracing::warn!("Start failed: {}", e);
                }
            }
            "stats" => {
                let stats = session.stats();
                tracing::info!(
                    "processed={} published={} dropped={} segment={:.1}ms composite={:.1}ms",
                    stats.processed,
                    stats.published,
                    stats.dropped(),
                    stats.average_ms(Stage::Segment),
                    stats.average_ms(Stage::Composite)
                );
            }
            "quit" | "exit" => return Ok(()),
            other => tracing::warn!("Unknown command '{}'", other),
        }
    }

    // Input closed: keep streaming until the process is interrupted.
    tracing::info!("stdin closed; press Ctrl+C to stop");
    loop {
        std::thread::park();
    }
}
