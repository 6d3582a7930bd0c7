use super::{CameraPosition, CaptureFactory, CaptureSource, SessionPreset};
use crate::error::CaptureError;
use crate::frame::RgbaFrame;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::{Duration, Instant};

/// Replays one still image at a fixed frame rate.
///
/// Stands in for a camera on machines without one and keeps the pipeline
/// paced like a live feed.
pub struct StillImageSource {
    frame: RgbaFrame,
    interval: Duration,
    next_due: Option<Instant>,
}

impl StillImageSource {
    pub fn new(frame: RgbaFrame, fps: u32) -> Self {
        Self {
            frame,
            interval: Duration::from_secs_f32(1.0 / fps.max(1) as f32),
            next_due: None,
        }
    }
}

impl CaptureSource for StillImageSource {
    fn capture_frame(&mut self) -> Result<RgbaFrame, CaptureError> {
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.interval);
        Ok(self.frame.clone())
    }

    fn resolution(&self) -> (u32, u32) {
        self.frame.dimensions()
    }
}

/// Opens [`StillImageSource`]s for either camera position.
///
/// The image is stretched to the preset resolution so presets behave the
/// same as with a real camera.
pub struct StillImageFactory {
    image: RgbaFrame,
    fps: u32,
}

impl StillImageFactory {
    pub fn new(image: RgbaFrame, fps: u32) -> Self {
        Self { image, fps }
    }

    pub fn from_path<P: AsRef<Path>>(path: P, fps: u32) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to read input image {}", path.display()))?
            .to_rgba8();
        tracing::info!(
            "Using still image {} ({}x{}) as capture source",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self::new(image, fps))
    }
}

impl CaptureFactory for StillImageFactory {
    fn open(
        &self,
        position: CameraPosition,
        preset: SessionPreset,
    ) -> Result<Box<dyn CaptureSource>, CaptureError> {
        let (width, height) = preset.resolution();
        let frame = if self.image.dimensions() == (width, height) {
            self.image.clone()
        } else {
            image::imageops::resize(
                &self.image,
                width,
                height,
                image::imageops::FilterType::Triangle,
            )
        };
        tracing::debug!("Still source opened for {:?} at {}x{}", position, width, height);
        Ok(Box::new(StillImageSource::new(frame, self.fps)))
    }
}
