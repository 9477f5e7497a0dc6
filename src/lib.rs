mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod config;
pub mod evaluation;
pub mod inference_service;
pub mod labels;
pub mod model_service;
pub mod normalizer;
pub mod ort_service;
pub mod ranking;

pub use app::{build_inference_service, start_app};
pub use inference_service::InferenceService;
pub use labels::LabelTable;
pub use model_service::ModelService;
pub use normalizer::{ImageNormalizer, ImageTensor, RawImage};
pub use ranking::{rank, PredictionRecord};
