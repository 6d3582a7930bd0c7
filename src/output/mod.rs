//! Destinations for composited frames.

mod loopback;

pub use loopback::V4L2Output;

use crate::frame::RgbaFrame;
use anyhow::Result;

/// Consumer of published output frames.
///
/// Sinks are driven from the `output_frame` dispatcher thread, one frame at a
/// time; a slow sink only delays its own delivery, never the pipeline.
pub trait OutputSink: Send {
    /// Write one composited frame, converting to the sink's format.
    fn write_frame(&mut self, frame: &RgbaFrame) -> Result<()>;

    /// Resolution frames are scaled to before writing.
    fn resolution(&self) -> (u32, u32);
}
