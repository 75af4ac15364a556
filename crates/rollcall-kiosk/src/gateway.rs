use rollcall_core::{AnalyzerError, FaceAnalyzer, InferenceResult};
use rollcall_hw::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("recognition panicked: {0}")]
    Panicked(String),
    #[error("inference worker exited")]
    WorkerGone,
}

/// Identification + emotion as one blocking call, run off the main thread.
pub trait RecognitionGateway: Send + 'static {
    fn infer(&mut self, image: &Frame) -> Result<InferenceResult, GatewayError>;
}

impl RecognitionGateway for FaceAnalyzer {
    fn infer(&mut self, image: &Frame) -> Result<InferenceResult, GatewayError> {
        let gray = image.luma();
        Ok(self.analyze(&gray, image.width, image.height)?)
    }
}
