use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct ClassLabels {
    labels: Vec<String>,
}

pub async fn class_labels<M: ModelService>(
    State(state): State<SharedState<M>>,
) -> Json<ClassLabels> {
    state.metrics.record_request("/api/labels");
    Json(ClassLabels {
        labels: state.inference_service.labels().as_slice().to_vec(),
    })
}
