mod still;
#[cfg(feature = "webcam")]
mod v4l_capture;

pub use still::{StillImageFactory, StillImageSource};
#[cfg(feature = "webcam")]
pub use v4l_capture::{WebcamCapture, WebcamFactory};

use crate::error::CaptureError;
use crate::frame::RgbaFrame;

/// Which camera the session captures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraPosition {
    #[default]
    Front,
    Back,
}

impl CameraPosition {
    pub fn flipped(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }

    /// Front-facing cameras are shown mirrored.
    pub fn is_mirrored(self) -> bool {
        self == Self::Front
    }
}

/// Capture resolution preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPreset {
    Low,
    Medium,
    #[default]
    High,
    Hd720,
    Hd1080,
}

impl SessionPreset {
    /// Requested capture resolution (width, height).
    pub fn resolution(self) -> (u32, u32) {
        match self {
            Self::Low => (320, 240),
            Self::Medium => (640, 480),
            Self::High | Self::Hd720 => (1280, 720),
            Self::Hd1080 => (1920, 1080),
        }
    }
}

/// Camera permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorizationStatus {
    #[default]
    NotDetermined,
    Authorized,
    Denied,
    Restricted,
}

/// Trait for camera capture sources
///
/// A source is opened on the pipeline worker thread and used only there.
pub trait CaptureSource {
    /// Capture a single frame, blocking until one is available.
    /// `CaptureError::Exhausted` ends the stream.
    fn capture_frame(&mut self) -> Result<RgbaFrame, CaptureError>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}

/// Opens capture sources; called again every time the session (re)starts.
pub trait CaptureFactory: Send + Sync {
    fn open(
        &self,
        position: CameraPosition,
        preset: SessionPreset,
    ) -> Result<Box<dyn CaptureSource>, CaptureError>;
}

/// Camera permission capability.
pub trait CameraAccess: Send + Sync {
    fn status(&self) -> AuthorizationStatus;

    /// Ask for access, blocking until the user (or platform) answers.
    fn request_access(&self) -> AuthorizationStatus;
}

/// Platforms without a camera permission model.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAuthorized;

impl CameraAccess for AlwaysAuthorized {
    fn status(&self) -> AuthorizationStatus {
        AuthorizationStatus::Authorized
    }

    fn request_access(&self) -> AuthorizationStatus {
        AuthorizationStatus::Authorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_position_flip_and_mirroring() {
        assert_eq!(CameraPosition::Front.flipped(), CameraPosition::Back);
        assert_eq!(CameraPosition::Back.flipped(), CameraPosition::Front);
        assert!(CameraPosition::Front.is_mirrored());
        assert!(!CameraPosition::Back.is_mirrored());
    }

    #[rstest]
    #[case(SessionPreset::Low, (320, 240))]
    #[case(SessionPreset::Medium, (640, 480))]
    #[case(SessionPreset::High, (1280, 720))]
    #[case(SessionPreset::Hd1080, (1920, 1080))]
    fn test_preset_resolution(#[case] preset: SessionPreset, #[case] expected: (u32, u32)) {
        assert_eq!(preset.resolution(), expected);
    }

    #[test]
    fn test_always_authorized() {
        assert_eq!(AlwaysAuthorized.status(), AuthorizationStatus::Authorized);
        assert_eq!(AlwaysAuthorized.request_access(), AuthorizationStatus::Authorized);
    }
}
