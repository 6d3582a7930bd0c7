use thiserror::Error;

use crate::capture::{AuthorizationStatus, CameraPosition};

/// Errors surfaced to the caller of the session control surface.
///
/// Only setup-time failures end up here; per-frame failures are contained in
/// the pipeline pass and show up as dropped frames in the statistics.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("camera access not granted ({0:?})")]
    PermissionDenied(AuthorizationStatus),

    #[error("no camera available for {position:?} position: {reason}")]
    DeviceUnavailable {
        position: CameraPosition,
        reason: String,
    },

    #[error("session is running; stop it before reconfiguring")]
    AlreadyRunning,

    #[error("failed to spawn pipeline worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Failures of a single pipeline pass. Never propagated past the pass.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("mask provider failed: {0}")]
    Segmentation(String),

    #[error("image operation could not be constructed: {0}")]
    FilterConstruction(String),

    #[error("{stage}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        stage: &'static str,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("frame has zero width or height")]
    EmptyFrame,
}

/// The still image behind an image background could not be read.
#[derive(Debug, Error)]
pub enum BackgroundDecodeError {
    #[error("failed to read background image {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to decode background image bytes: {0}")]
    Decode(#[source] image::ImageError),

    #[error("background image has zero width or height")]
    Empty,
}

/// Errors raised by acquisition sources.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no camera for {0:?} position")]
    DeviceUnavailable(CameraPosition),

    #[error("failed to open camera: {0}")]
    Open(String),

    #[error("failed to capture frame: {0}")]
    Frame(String),

    #[error("capture source exhausted")]
    Exhausted,
}
