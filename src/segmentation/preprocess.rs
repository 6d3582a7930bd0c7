use crate::frame::{Mask, RgbaFrame};
use anyhow::{bail, Result};
use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayViewD};

/// Preprocessor for converting RGBA frames to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Preprocess a frame into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Stretch to target dimensions (the mask is stretched back later)
    /// 2. Drop alpha, convert to float and normalize to [0, 1]
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, frame: &RgbaFrame) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if frame.dimensions() != self.target_size() {
            resized = imageops::resize(
                frame,
                self.target_width,
                self.target_height,
                FilterType::Triangle,
            );
            &resized
        } else {
            frame
        };

        let (width, height) = source.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in source.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
            tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
        }
        tensor
    }
}

/// Convert a model output of shape `[1, 1, H, W]` (or `[1, H, W]`, `[H, W]`)
/// into a mask at model resolution.
pub fn tensor_to_mask(output: ArrayViewD<'_, f32>) -> Result<Mask> {
    let shape = output.shape();
    let (height, width) = match shape {
        [h, w] | [1, h, w] | [1, 1, h, w] => (*h, *w),
        _ => bail!("unexpected matte shape {:?}", shape),
    };
    if height == 0 || width == 0 {
        bail!("model returned an empty matte");
    }

    let values: Vec<f32> = output
        .iter()
        .map(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 })
        .collect();
    Mask::from_raw(width as u32, height as u32, values)
        .ok_or_else(|| anyhow::anyhow!("matte buffer does not match {}x{}", width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgba;
    use ndarray::{Array, IxDyn};

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let frame = RgbaFrame::from_pixel(8, 8, Rgba([255, 0, 51, 10]));
        let tensor = Preprocessor::square(8).preprocess(&frame);
        assert_eq!(tensor.shape(), &[1, 3, 8, 8]);
        assert_relative_eq!(tensor[[0, 0, 3, 3]], 1.0);
        assert_relative_eq!(tensor[[0, 1, 3, 3]], 0.0);
        assert_relative_eq!(tensor[[0, 2, 3, 3]], 0.2);
    }

    #[test]
    fn test_preprocess_resizes_to_target() {
        let frame = RgbaFrame::new(64, 36);
        let tensor = Preprocessor::new(32, 16).preprocess(&frame);
        assert_eq!(tensor.shape(), &[1, 3, 16, 32]);
    }

    #[test]
    fn test_tensor_to_mask_nchw() {
        let data: Vec<f32> = (0..6).map(|v| v as f32 / 5.0).collect();
        let output = Array::from_shape_vec(IxDyn(&[1, 1, 2, 3]), data).unwrap();
        let mask = tensor_to_mask(output.view()).unwrap();
        assert_eq!(mask.dimensions(), (3, 2));
        assert_relative_eq!(mask.get_pixel(2, 1)[0], 1.0);
        assert_relative_eq!(mask.get_pixel(1, 0)[0], 0.2);
    }

    #[test]
    fn test_tensor_to_mask_clamps_and_sanitizes() {
        let output =
            Array::from_shape_vec(IxDyn(&[2, 2]), vec![-1.0, 2.0, f32::NAN, 0.5]).unwrap();
        let mask = tensor_to_mask(output.view()).unwrap();
        let values: Vec<f32> = mask.pixels().map(|p| p[0]).collect();
        assert_eq!(values, vec![0.0, 1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_tensor_to_mask_rejects_multichannel() {
        let output = Array::<f32, _>::zeros(IxDyn(&[1, 3, 4, 4]));
        assert!(tensor_to_mask(output.view()).is_err());
    }
}
