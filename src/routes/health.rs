use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Status {
    status: &'static str,
    model: &'static str,
    classes: usize,
}

pub async fn healthcheck<M: ModelService>(State(state): State<SharedState<M>>) -> Json<Status> {
    state.metrics.record_request("/api/health");
    let inference_service = &state.inference_service;
    let model = if inference_service.is_model_loaded() {
        "loaded"
    } else {
        "not_loaded"
    };

    Json(Status {
        status: "ok",
        model,
        classes: inference_service.num_classes(),
    })
}
