#[cfg(feature = "onnx")]
mod matting;
#[cfg(feature = "onnx")]
mod preprocess;
pub mod types;

#[cfg(feature = "onnx")]
pub use matting::OnnxMatteProvider;
#[cfg(feature = "onnx")]
pub use preprocess::{tensor_to_mask, Preprocessor};
pub use types::{MaskProvider, SegmentationQuality};

/// Create the default mask provider (ONNX matting model)
#[cfg(feature = "onnx")]
pub fn create_default_provider(
    model_path: &str,
    quality: SegmentationQuality,
) -> anyhow::Result<Box<dyn MaskProvider>> {
    let provider = OnnxMatteProvider::new(model_path, quality)?;
    Ok(Box::new(provider))
}
