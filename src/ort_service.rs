use crate::{
    config::{ModelConfig, Validatable},
    model_service::{ModelError, ModelService},
    normalizer::ImageTensor,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: Arc<str>,
    num_classes: usize,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        let model_path = model_config.get_path();
        if model_config.validate().is_err() {
            return Err(ModelError::ArtifactNotFound(model_path));
        }

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()
                    .map_err(|e| ModelError::Load(e.to_string()))?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .map_err(|e| ModelError::Load(e.to_string()))?
                    .commit_from_file(&model_path)
                    .map_err(|e| ModelError::Load(e.to_string()))?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        let output_name: Arc<str> = {
            let session = sessions[0].lock();
            let output = session
                .outputs
                .first()
                .ok_or_else(|| ModelError::Load("model declares no outputs".into()))?;
            output.name.as_str().into()
        };

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_path
        );

        let mut service = Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name,
            num_classes: 0,
        };

        // Warm-up pass; the output width is only known once the graph has run.
        let probe = service.run_inference(&ImageTensor::zeros(model_config.input_size))?;
        if probe.is_empty() {
            return Err(ModelError::Load("model produced an empty output".into()));
        }
        service.num_classes = probe.len();
        tracing::info!("Model outputs {} classes", service.num_classes);

        Ok(service)
    }

    fn run_inference(&self, input: &ImageTensor) -> Result<Vec<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index].lock();

        tracing::debug!("Running inference on session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (_shape, data) = outputs[&*self.output_name]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("failed to extract tensor: {}", e)))?;

        Ok(data.to_vec())
    }
}

impl ModelService for OrtModelService {
    fn infer(&self, input: &ImageTensor) -> Result<Vec<f32>, ModelError> {
        let probabilities = self.run_inference(input)?;
        if probabilities.len() != self.num_classes {
            return Err(ModelError::Inference(format!(
                "expected {} outputs, got {}",
                self.num_classes,
                probabilities.len()
            )));
        }
        Ok(probabilities)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
