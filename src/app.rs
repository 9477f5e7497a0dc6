use crate::{
    config::{Config, Validatable},
    inference_service::InferenceService,
    labels::LabelTable,
    normalizer::ImageNormalizer,
    ort_service::OrtModelService,
    server::{HttpServer, SharedState},
    telemetry::Metrics,
};
use anyhow::Context;
use std::sync::Arc;
use tokio::{signal, sync::broadcast};

/// Loads the label table and the model. A missing or broken model artifact
/// leaves the service running without inference; a label table that does
/// not match the model output is fatal.
pub fn build_inference_service(config: &Config) -> anyhow::Result<InferenceService<OrtModelService>> {
    let labels_path = config.labels.get_path();
    let labels = LabelTable::from_file(&labels_path)
        .with_context(|| format!("failed to load labels from {:?}", labels_path))?;
    tracing::info!("Loaded {} class labels", labels.len());

    let model_service = match OrtModelService::new(&config.model) {
        Ok(service) => Some(service),
        Err(e) => {
            tracing::error!("Model unavailable, predictions are disabled: {}", e);
            None
        }
    };

    let inference_service = InferenceService::new(
        model_service,
        labels,
        ImageNormalizer::new(config.model.input_size),
        &config.prediction,
    )
    .context("label table does not match the model")?;

    Ok(inference_service)
}

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let inference_service = build_inference_service(&config)?;
    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);

    let state = SharedState::new(inference_service, metrics, &config.server);
    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe());

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
