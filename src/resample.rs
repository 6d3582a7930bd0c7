//! Stretch a segmentation mask onto the raw frame's pixel grid.

use crate::error::FrameError;
use crate::frame::{is_empty, Mask};
use image::imageops::{self, FilterType};

/// Per-axis scale from mask space to frame space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactors {
    pub x: f64,
    pub y: f64,
}

impl ScaleFactors {
    pub fn between(from: (u32, u32), to: (u32, u32)) -> Self {
        Self {
            x: to.0 as f64 / from.0 as f64,
            y: to.1 as f64 / from.1 as f64,
        }
    }

    pub fn is_uniform(&self) -> bool {
        (self.x - self.y).abs() < f64::EPSILON
    }
}

/// Resample `mask` to exactly `width` x `height` with bilinear filtering.
///
/// The axes scale independently; the mask's aspect ratio is not preserved
/// because it has to line up pixel-for-pixel with the frame.
pub fn resample(mask: &Mask, width: u32, height: u32) -> Result<Mask, FrameError> {
    let (mw, mh) = mask.dimensions();
    if is_empty(mw, mh) || is_empty(width, height) {
        return Err(FrameError::EmptyFrame);
    }
    if (mw, mh) == (width, height) {
        return Ok(mask.clone());
    }

    let _span = tracing::debug_span!("resample").entered();
    let scale = ScaleFactors::between((mw, mh), (width, height));
    if !scale.is_uniform() {
        tracing::trace!(
            "Non-uniform mask scale {:.3}x{:.3} ({}x{} -> {}x{})",
            scale.x,
            scale.y,
            mw,
            mh,
            width,
            height
        );
    }

    let resized = imageops::resize(mask, width, height, FilterType::Triangle);
    if resized.dimensions() != (width, height) {
        return Err(FrameError::DimensionMismatch {
            stage: "resample",
            expected: (width, height),
            actual: resized.dimensions(),
        });
    }
    Ok(resized)
}
