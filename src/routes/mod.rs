mod health;
mod labels;
mod metrics;
mod predict;

use crate::{model_service::ModelService, server::SharedState};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    success: bool,
    error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/api/predict", post(predict::predict_image::<M>))
        .route("/api/predict/base64", post(predict::predict_base64::<M>))
        .route("/api/health", get(health::healthcheck::<M>))
        .route("/api/labels", get(labels::class_labels::<M>))
        .route("/metrics", get(metrics::metrics_handler::<M>))
        .fallback(not_found)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(ErrorBody::new("Endpoint not found")))
}
