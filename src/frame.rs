use image::{ImageBuffer, Luma, RgbaImage};

/// Color frame flowing through the pipeline (raw capture, backgrounds, output).
pub type RgbaFrame = RgbaImage;

/// Foreground confidence: one f32 channel, 0.0 = background, 1.0 = foreground.
/// Dimensions are whatever the mask provider produced.
pub type Mask = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A raw frame as delivered by the acquisition layer.
///
/// `generation` identifies the capture session the frame was taken under; it
/// changes every time the camera is (re)started so frames from a previous
/// device can be recognised and discarded.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub image: RgbaFrame,
    pub generation: u64,
    pub sequence: u64,
}

impl CapturedFrame {
    pub fn new(image: RgbaFrame, generation: u64, sequence: u64) -> Self {
        Self {
            image,
            generation,
            sequence,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Build a mask with the same value everywhere.
pub fn uniform_mask(width: u32, height: u32, value: f32) -> Mask {
    Mask::from_pixel(width, height, Luma([value]))
}

/// Build a mask from row-major confidence values.
///
/// Returns `None` when `values` does not hold exactly `width * height` entries.
pub fn mask_from_values(width: u32, height: u32, values: Vec<f32>) -> Option<Mask> {
    Mask::from_raw(width, height, values)
}

/// Render a mask as an opaque grayscale frame, handy for inspecting what the
/// segmentation stage produced.
pub fn mask_to_rgba(mask: &Mask) -> RgbaFrame {
    let (width, height) = mask.dimensions();
    RgbaFrame::from_fn(width, height, |x, y| {
        let value = (mask.get_pixel(x, y)[0] * 255.0).round().clamp(0.0, 255.0) as u8;
        image::Rgba([value, value, value, 255])
    })
}

pub(crate) fn is_empty(width: u32, height: u32) -> bool {
    width == 0 || height == 0
}
