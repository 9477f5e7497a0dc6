use crate::{
    config::PredictionConfig,
    labels::{LabelError, LabelTable},
    model_service::{ModelError, ModelService},
    normalizer::{DecodeError, ImageNormalizer, RawImage},
    ranking::{rank, PredictionRecord, RankError},
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Model not loaded")]
    ModelNotLoaded,
    #[error("Image preprocessing error: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Rank(#[from] RankError),
    #[error("Prediction task failed: {0}")]
    Task(String),
}

/// The shared request pipeline: normalize, infer, rank.
///
/// Holds no per-request state. `model_service` is `None` when the artifact
/// failed to load, in which case every request short-circuits.
#[derive(Clone)]
pub struct InferenceService<M: ModelService> {
    model_service: Option<Arc<M>>,
    labels: Arc<LabelTable>,
    normalizer: ImageNormalizer,
    top_k: usize,
}

impl<M: ModelService> InferenceService<M> {
    pub fn new(
        model_service: Option<M>,
        labels: LabelTable,
        normalizer: ImageNormalizer,
        prediction_config: &PredictionConfig,
    ) -> Result<Self, LabelError> {
        if let Some(model) = &model_service {
            labels.validate_output_width(model.num_classes())?;
        }

        Ok(Self {
            model_service: model_service.map(Arc::new),
            labels: Arc::new(labels),
            normalizer,
            top_k: prediction_config.top_k,
        })
    }

    pub fn is_model_loaded(&self) -> bool {
        self.model_service.is_some()
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// Full probability vector for one image.
    pub fn probabilities(&self, raw: RawImage) -> Result<Vec<f32>, PredictionError> {
        let model = self
            .model_service
            .as_ref()
            .ok_or(PredictionError::ModelNotLoaded)?;

        let input = self.normalizer.normalize(raw)?;
        let probabilities = model.infer(&input)?;
        if let Some(index) = probabilities.iter().position(|p| !p.is_finite()) {
            return Err(ModelError::Inference(format!(
                "non-finite probability {} at index {}",
                probabilities[index], index
            ))
            .into());
        }
        Ok(probabilities)
    }

    pub fn classify(&self, raw: RawImage) -> Result<PredictionRecord, PredictionError> {
        let probabilities = self.probabilities(raw)?;
        let record = rank(&probabilities, &self.labels, self.top_k)?;
        Ok(record)
    }

    /// Never fails: errors become a failure record.
    pub fn predict_blocking(&self, raw: RawImage) -> PredictionRecord {
        match self.classify(raw) {
            Ok(record) => record,
            Err(err) => into_failure(err),
        }
    }

    /// Runs the pipeline on the blocking thread pool.
    pub async fn predict(&self, raw: RawImage) -> PredictionRecord {
        if !self.is_model_loaded() {
            return into_failure(PredictionError::ModelNotLoaded);
        }

        let service = self.clone();
        match tokio::task::spawn_blocking(move || service.predict_blocking(raw)).await {
            Ok(record) => record,
            Err(e) => into_failure(PredictionError::Task(e.to_string())),
        }
    }
}

fn into_failure(err: PredictionError) -> PredictionRecord {
    match &err {
        PredictionError::Rank(_) => tracing::error!("Label table and model disagree: {}", err),
        PredictionError::ModelNotLoaded => tracing::debug!("Rejecting prediction: {}", err),
        _ => tracing::warn!("Prediction failed: {}", err),
    }
    PredictionRecord::failure(err.to_string())
}
