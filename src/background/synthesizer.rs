use super::blur::gaussian_blur;
use super::{BackdropImage, BackgroundMode, Color};
use crate::error::FrameError;
use crate::frame::{is_empty, RgbaFrame};
use image::imageops::{self, FilterType};

/// Substituted when an image background cannot be decoded.
pub const FALLBACK_COLOR: Color = Color::rgb(0, 0, 255);

/// Result of background synthesis.
#[derive(Debug, Clone)]
pub enum Background {
    /// No background replacement: the caller emits the raw frame unchanged
    /// and skips resampling and blending entirely.
    Passthrough,
    /// A full-frame background aligned with the raw frame.
    Layer(RgbaFrame),
    /// The fallback fill used in place of an unreadable image.
    Fallback(RgbaFrame),
}

impl Background {
    pub fn frame(&self) -> Option<&RgbaFrame> {
        match self {
            Self::Passthrough => None,
            Self::Layer(frame) | Self::Fallback(frame) => Some(frame),
        }
    }

    pub fn into_frame(self) -> Option<RgbaFrame> {
        match self {
            Self::Passthrough => None,
            Self::Layer(frame) | Self::Fallback(frame) => Some(frame),
        }
    }
}

/// Produce the background for one frame, exactly `width` x `height`.
///
/// `raw` is the frame currently being processed; only the blur mode reads it.
pub fn synthesize(
    mode: &BackgroundMode,
    width: u32,
    height: u32,
    raw: &RgbaFrame,
) -> Result<Background, FrameError> {
    if mode.is_passthrough() {
        return Ok(Background::Passthrough);
    }
    if is_empty(width, height) {
        return Err(FrameError::EmptyFrame);
    }

    let _span = tracing::debug_span!("synthesize", mode = mode.kind()).entered();

    let background = match mode {
        BackgroundMode::None => Background::Passthrough,
        BackgroundMode::Blur { radius } => {
            let blurred = gaussian_blur(raw, *radius)?;
            Background::Layer(fit_exact(blurred, width, height))
        }
        BackgroundMode::Color(color) => Background::Layer(solid(*color, width, height)),
        BackgroundMode::Image(image) => image_background(image, width, height),
    };
    Ok(background)
}

fn solid(color: Color, width: u32, height: u32) -> RgbaFrame {
    RgbaFrame::from_pixel(width, height, color.to_pixel())
}

fn image_background(image: &BackdropImage, width: u32, height: u32) -> Background {
    match image.bitmap() {
        Some(bitmap) => Background::Layer(cover(bitmap, width, height)),
        None => Background::Fallback(solid(FALLBACK_COLOR, width, height)),
    }
}

/// Scale `bitmap` uniformly so it covers `width` x `height`, then crop the
/// centered target rectangle.
pub(crate) fn cover(bitmap: &RgbaFrame, width: u32, height: u32) -> RgbaFrame {
    let (bw, bh) = bitmap.dimensions();
    let scale = f64::max(width as f64 / bw as f64, height as f64 / bh as f64);
    // Rounding may land one pixel short of the target; never go below it.
    let sw = ((bw as f64 * scale).round() as u32).max(width);
    let sh = ((bh as f64 * scale).round() as u32).max(height);

    let x = (sw - width) / 2;
    let y = (sh - height) / 2;

    if (sw, sh) == (bw, bh) {
        return imageops::crop_imm(bitmap, x, y, width, height).to_image();
    }
    let scaled = imageops::resize(bitmap, sw, sh, FilterType::Triangle);
    imageops::crop_imm(&scaled, x, y, width, height).to_image()
}

/// The blur keeps the raw extent; if the raw frame does not match the target
/// (it always should) stretch it so the caller still gets a full frame.
fn fit_exact(frame: RgbaFrame, width: u32, height: u32) -> RgbaFrame {
    if frame.dimensions() == (width, height) {
        frame
    } else {
        tracing::debug!(
            "Stretching blurred background {:?} to {}x{}",
            frame.dimensions(),
            width,
            height
        );
        imageops::resize(&frame, width, height, FilterType::Triangle)
    }
}
