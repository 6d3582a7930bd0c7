use super::{CameraPosition, CaptureFactory, CaptureSource, SessionPreset};
use crate::error::CaptureError;
use crate::frame::RgbaFrame;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;

pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl WebcamCapture {
    pub fn new(device_index: u32, preset: SessionPreset, fps: u32) -> Result<Self, CaptureError> {
        let (width, height) = preset.resolution();
        tracing::info!(
            "Initializing webcam {} at {}x{}",
            device_index,
            width,
            height
        );

        let index = CameraIndex::Index(device_index);
        let format = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

        let mut camera =
            Camera::new(index, requested).map_err(|e| CaptureError::Open(e.to_string()))?;

        camera
            .open_stream()
            .map_err(|e| CaptureError::Open(format!("failed to open camera stream: {e}")))?;

        let actual = camera.resolution();
        tracing::info!(
            "Webcam initialized successfully ({}x{})",
            actual.width(),
            actual.height()
        );

        Ok(Self {
            camera,
            width: actual.width(),
            height: actual.height(),
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<RgbaFrame, CaptureError> {
        let frame = self
            .camera
            .frame()
            .map_err(|e| CaptureError::Frame(e.to_string()))?;

        let decoded = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::Frame(format!("failed to decode frame: {e}")))?;

        Ok(image::DynamicImage::ImageRgb8(decoded).into_rgba8())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop camera stream: {}", e);
        }
    }
}

/// Maps camera positions to v4l device indices.
pub struct WebcamFactory {
    front: u32,
    back: Option<u32>,
    fps: u32,
}

impl WebcamFactory {
    pub fn new(front: u32, back: Option<u32>, fps: u32) -> Self {
        Self { front, back, fps }
    }
}

impl CaptureFactory for WebcamFactory {
    fn open(
        &self,
        position: CameraPosition,
        preset: SessionPreset,
    ) -> Result<Box<dyn CaptureSource>, CaptureError> {
        let index = match position {
            CameraPosition::Front => self.front,
            CameraPosition::Back => self
                .back
                .ok_or(CaptureError::DeviceUnavailable(position))?,
        };
        let capture = WebcamCapture::new(index, preset, self.fps)?;
        Ok(Box::new(capture))
    }
}
