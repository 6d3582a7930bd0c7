use crate::frame::{Mask, RgbaFrame};
use anyhow::Result;

/// Speed/quality trade-off of the segmentation stage, fixed when the
/// pipeline is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentationQuality {
    Fast,
    #[default]
    Balanced,
    Accurate,
}

impl SegmentationQuality {
    /// Square model input resolution used at this level.
    pub fn input_size(self) -> u32 {
        match self {
            Self::Fast => 256,
            Self::Balanced => 384,
            Self::Accurate => 512,
        }
    }
}

/// Trait for foreground mask providers
/// Allows swapping between different backends (ONNX matting models, test fixtures, ...)
///
/// Each call is independent: providers get one frame and return one mask,
/// with no state carried between frames.
pub trait MaskProvider: Send {
    /// Produce a foreground confidence mask for `frame`
    ///
    /// # Returns
    /// * Mask with values 0.0-1.0 (1.0 = foreground). Its dimensions are the
    ///   provider's choice; the pipeline stretches it onto the frame.
    fn segment(&mut self, frame: &RgbaFrame) -> Result<Mask>;

    /// Apply a new quality level. Called only while the session is stopped.
    fn set_quality(&mut self, _quality: SegmentationQuality) {}

    /// Name used in logs.
    fn name(&self) -> &str {
        "mask-provider"
    }
}

impl<P: MaskProvider + ?Sized> MaskProvider for Box<P> {
    fn segment(&mut self, frame: &RgbaFrame) -> Result<Mask> {
        (**self).segment(frame)
    }

    fn set_quality(&mut self, quality: SegmentationQuality) {
        (**self).set_quality(quality)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
