use crate::{
    model_service::ModelService,
    normalizer::RawImage,
    ranking::PredictionRecord,
    routes::ErrorBody,
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        rejection::JsonRejection,
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const PREDICT_ROUTE: &str = "/api/predict";
const PREDICT_BASE64_ROUTE: &str = "/api/predict/base64";
const IMAGE_FIELD: &str = "image";

#[derive(Error, Debug)]
pub enum PredictImageError {
    #[error("No image file provided")]
    MissingImage,
    #[error("No file selected")]
    EmptyFilename,
    #[error("File too large. Max size: {}", display_limit(*.0))]
    PayloadTooLarge(usize),
    #[error("Invalid multipart request: {0}")]
    InvalidMultipart(String),
    #[error("Invalid JSON request: {0}")]
    InvalidJson(String),
}

impl IntoResponse for PredictImageError {
    fn into_response(self) -> Response {
        let status = match self {
            PredictImageError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            PredictImageError::MissingImage
            | PredictImageError::EmptyFilename
            | PredictImageError::InvalidMultipart(_)
            | PredictImageError::InvalidJson(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct Base64Image {
    image: String,
}

#[instrument(skip(state, multipart))]
pub async fn predict_image<M: ModelService>(
    State(state): State<SharedState<M>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionRecord>, PredictImageError> {
    state.metrics.record_request(PREDICT_ROUTE);
    let mut multipart = multipart.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            PredictImageError::PayloadTooLarge(state.max_upload_bytes)
        } else {
            PredictImageError::InvalidMultipart(e.body_text())
        }
    })?;

    let image_data = read_image_field(&mut multipart, state.max_upload_bytes).await?;
    tracing::debug!("Received {} bytes of image data", image_data.len());

    let record = run_prediction(&state, RawImage::Bytes(image_data), PREDICT_ROUTE).await;
    Ok(Json(record))
}

#[instrument(skip(state, payload))]
pub async fn predict_base64<M: ModelService>(
    State(state): State<SharedState<M>>,
    payload: Result<Json<Base64Image>, JsonRejection>,
) -> Result<Json<PredictionRecord>, PredictImageError> {
    state.metrics.record_request(PREDICT_BASE64_ROUTE);
    let Json(payload) = payload.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            PredictImageError::PayloadTooLarge(state.max_upload_bytes)
        } else {
            PredictImageError::InvalidJson(e.body_text())
        }
    })?;

    let record = run_prediction(&state, RawImage::Base64(payload.image), PREDICT_BASE64_ROUTE).await;
    Ok(Json(record))
}

async fn read_image_field(
    multipart: &mut Multipart,
    max_upload_bytes: usize,
) -> Result<Bytes, PredictImageError> {
    let to_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            PredictImageError::PayloadTooLarge(max_upload_bytes)
        } else {
            PredictImageError::InvalidMultipart(e.body_text())
        }
    };

    while let Some(field) = multipart.next_field().await.map_err(to_error)? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        // Plain form values are not uploads.
        let Some(file_name) = field.file_name() else {
            continue;
        };
        // Browsers send `filename=""` when no file was picked.
        if file_name.is_empty() {
            return Err(PredictImageError::EmptyFilename);
        }
        return field.bytes().await.map_err(to_error);
    }

    Err(PredictImageError::MissingImage)
}

async fn run_prediction<M: ModelService>(
    state: &SharedState<M>,
    raw: RawImage,
    route: &str,
) -> PredictionRecord {
    let start = Instant::now();
    let prediction = state.inference_service.predict(raw);

    // The blocking task keeps running after a timeout; only its result is dropped.
    let record = match state.prediction_timeout {
        Some(limit) => match tokio::time::timeout(limit, prediction).await {
            Ok(record) => record,
            Err(_) => {
                tracing::warn!("Prediction exceeded {} ms, abandoning", limit.as_millis());
                PredictionRecord::failure(format!(
                    "Prediction timed out after {} ms",
                    limit.as_millis()
                ))
            }
        },
        None => prediction.await,
    };

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    state.metrics.record_prediction_duration(elapsed_ms, route);
    state.metrics.record_prediction_outcome(record.success());

    if record.success() {
        tracing::info!(
            "Predicted {} ({:.3}) in {:.1} ms",
            record.label(),
            record.confidence(),
            elapsed_ms
        );
    }

    record
}

const MIB: usize = 1024 * 1024;

fn display_limit(max_upload_bytes: usize) -> String {
    if max_upload_bytes >= MIB && max_upload_bytes % MIB == 0 {
        format!("{}MB", max_upload_bytes / MIB)
    } else {
        format!("{} bytes", max_upload_bytes)
    }
}
