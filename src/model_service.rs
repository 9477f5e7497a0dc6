use crate::normalizer::ImageTensor;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model artifact not found: {0:?}")]
    ArtifactNotFound(PathBuf),
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// A loaded classifier. Inference is a pure function of the weights and the
/// input tensor; implementations must be safe to call from several threads.
pub trait ModelService: Send + Sync + Clone + 'static {
    /// Probability vector of length [`ModelService::num_classes`].
    fn infer(&self, input: &ImageTensor) -> Result<Vec<f32>, ModelError>;

    fn num_classes(&self) -> usize;
}
