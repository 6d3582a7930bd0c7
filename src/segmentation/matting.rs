use super::preprocess::{tensor_to_mask, Preprocessor};
use super::types::{MaskProvider, SegmentationQuality};
use crate::frame::{Mask, RgbaFrame};
use anyhow::{anyhow, Context, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;

/// Portrait matting model run through ONNX Runtime
///
/// Expects a single `[1, 3, H, W]` RGB input in [0, 1] and produces a
/// `[1, 1, H, W]` alpha matte as its first output (MODNet, selfie
/// segmentation exports and similar). Frames are processed independently.
pub struct OnnxMatteProvider {
    session: Session,
    preprocessor: Preprocessor,
    quality: SegmentationQuality,
}

impl OnnxMatteProvider {
    /// Create a new provider from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `quality` - Picks the model input resolution
    pub fn new<P: AsRef<Path>>(model_path: P, quality: SegmentationQuality) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading matting model from {}", path.display());

        let session = Session::builder()
            .map_err(|e| anyhow!("{e}"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("{e}"))?
            .with_intra_threads(4)
            .map_err(|e| anyhow!("{e}"))?
            .commit_from_file(path)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!(
            "Matting model loaded, input {}x{}",
            quality.input_size(),
            quality.input_size()
        );

        Ok(Self {
            session,
            preprocessor: Preprocessor::square(quality.input_size()),
            quality,
        })
    }

    pub fn quality(&self) -> SegmentationQuality {
        self.quality
    }
}

impl MaskProvider for OnnxMatteProvider {
    fn segment(&mut self, frame: &RgbaFrame) -> Result<Mask> {
        let _span = tracing::debug_span!("onnx_segment").entered();

        let input = self.preprocessor.preprocess(frame);
        let input = ort::value::Tensor::from_array(input).map_err(|e| anyhow!("{e}"))?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| anyhow!("{e}"))
            .context("Failed to run inference")?;
        drop(_infer_span);

        let matte = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| anyhow!("{e}"))
            .context("Failed to read matte output")?;

        tensor_to_mask(matte)
    }

    fn set_quality(&mut self, quality: SegmentationQuality) {
        if quality != self.quality {
            tracing::info!(
                "Segmentation quality {:?} -> {:?} ({}px input)",
                self.quality,
                quality,
                quality.input_size()
            );
            self.quality = quality;
            self.preprocessor = Preprocessor::square(quality.input_size());
        }
    }

    fn name(&self) -> &str {
        "onnx-matte"
    }
}
