//! Real-time person segmentation and background compositing.
//!
//! Frames flow from a [`capture::CaptureSource`] through a
//! [`pipeline::FramePipeline`] (segment, synthesize background, composite)
//! and are published by a [`pipeline::Session`] to its `output_frame`
//! observable.

pub mod background;
pub mod capture;
pub mod composite;
pub mod error;
pub mod frame;
pub mod observable;
pub mod orientation;
pub mod output;
pub mod pipeline;
pub mod resample;
pub mod segmentation;

pub use background::{BackdropImage, BackgroundMode, Color};
pub use error::{BackgroundDecodeError, CaptureError, FrameError, SessionError};
pub use frame::{Mask, RgbaFrame};
pub use pipeline::{Session, SessionConfig, SessionState};
