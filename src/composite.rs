use crate::error::FrameError;
use crate::frame::{Mask, RgbaFrame};
use image::Rgba;

/// Blend `foreground` over `background` using `mask` as per-pixel weight.
///
/// `out = fg * m + bg * (1 - m)` per color channel, with `m` clamped to
/// `[0, 1]`. The result is always opaque regardless of either input's alpha.
/// All three inputs must have the same dimensions.
pub fn composite(
    foreground: &RgbaFrame,
    background: &RgbaFrame,
    mask: &Mask,
) -> Result<RgbaFrame, FrameError> {
    let expected = foreground.dimensions();
    check_dimensions("composite background", expected, background.dimensions())?;
    check_dimensions("composite mask", expected, mask.dimensions())?;

    let _span = tracing::debug_span!("composite").entered();

    let mut out = RgbaFrame::new(expected.0, expected.1);
    for (((dst, fg), bg), m) in out
        .pixels_mut()
        .zip(foreground.pixels())
        .zip(background.pixels())
        .zip(mask.pixels())
    {
        *dst = blend_pixel(fg, bg, m[0]);
    }
    Ok(out)
}

#[inline]
fn blend_pixel(fg: &Rgba<u8>, bg: &Rgba<u8>, weight: f32) -> Rgba<u8> {
    let m = if weight.is_nan() { 0.0 } else { weight.clamp(0.0, 1.0) };
    let mix = |f: u8, b: u8| (f as f32 * m + b as f32 * (1.0 - m)).round().clamp(0.0, 255.0) as u8;
    Rgba([mix(fg[0], bg[0]), mix(fg[1], bg[1]), mix(fg[2], bg[2]), 255])
}

fn check_dimensions(
    stage: &'static str,
    expected: (u32, u32),
    actual: (u32, u32),
) -> Result<(), FrameError> {
    if expected == actual {
        Ok(())
    } else {
        Err(FrameError::DimensionMismatch {
            stage,
            expected,
            actual,
        })
    }
}
