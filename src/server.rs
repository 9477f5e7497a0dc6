use crate::{
    config::ServerConfig, inference_service::InferenceService, model_service::ModelService,
    routes::api_routes, telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, Router};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

#[derive(Clone)]
pub struct SharedState<M: ModelService> {
    pub inference_service: InferenceService<M>,
    pub metrics: Arc<Metrics>,
    pub max_upload_bytes: usize,
    pub prediction_timeout: Option<Duration>,
}

impl<M: ModelService> SharedState<M> {
    pub fn new(
        inference_service: InferenceService<M>,
        metrics: Arc<Metrics>,
        config: &ServerConfig,
    ) -> Self {
        let prediction_timeout = match config.prediction_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        Self {
            inference_service,
            metrics,
            max_upload_bytes: config.max_upload_bytes,
            prediction_timeout,
        }
    }
}

pub fn build_router<M: ModelService>(state: SharedState<M>) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    api_routes().with_state(state).layer(body_limit)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        state: SharedState<M>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let addr = config.get_address();
        let router = build_router(state);
        let listener = TcpListener::bind(&addr).await?;

        Ok(Self { router, listener })
    }

    pub fn run(self, mut shutdown_rx: Receiver<()>) -> JoinHandle<anyhow::Result<()>> {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!("Starting app on {}", addr),
            Err(e) => tracing::warn!("Starting app on unknown address: {}", e),
        }

        let listener = self.listener;
        let router = self.router;
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        })
    }
}
