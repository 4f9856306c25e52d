//! Client-facing surface: the per-session WebSocket and the HTTP read path.

mod http;
mod ws;

pub use http::{ApiError, HistoryQuery};
pub use ws::{ConnectParams, SessionConnection};

use crate::config::FrameFormat;
use crate::hub::SessionHub;
use crate::pipeline::Pipeline;
use crate::store::MetricsStore;
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

const LOG_TARGET: &str = "transport";

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to send to client: {0}")]
    Send(String),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handles shared by every connection and request.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub hub: Arc<SessionHub>,
    pub store: Arc<dyn MetricsStore>,
    pub format: FrameFormat,
    pub history_limit: usize,
}

impl AppState {
    pub fn new(pipeline: Pipeline, format: FrameFormat, history_limit: usize) -> Self {
        let aggregator = pipeline.aggregator();
        Self {
            hub: aggregator.hub().clone(),
            store: aggregator.store().clone(),
            pipeline,
            format,
            history_limit,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/sessions/:session_id/latest", get(http::latest))
        .route("/sessions/:session_id/history", get(http::history))
        .route("/ws/:session_id", get(ws::ws_handler))
        .with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), TransportError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(target: LOG_TARGET, %addr, "listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(TransportError::Io)?;
    tracing::info!(target: LOG_TARGET, "server stopped");
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::aggregator::FeatureAggregator;
    use crate::config::{AnalysisConfig, OverloadPolicy, WorkerPoolConfig};
    use crate::features::FeatureExtractor;
    use crate::pipeline::AnalysisPool;
    use crate::store::MemoryMetricsStore;

    pub fn state() -> AppState {
        let analysis = AnalysisConfig::default();
        let pool_config = WorkerPoolConfig::new(2, 8, OverloadPolicy::DropOldest).expect("valid");
        let pool = AnalysisPool::with_feature_extractor(&pool_config, FeatureExtractor::new(&analysis))
            .expect("pool");
        let aggregator = FeatureAggregator::new(
            Arc::new(MemoryMetricsStore::new()),
            Arc::new(SessionHub::new(32)),
        );
        AppState::new(Pipeline::new(Arc::new(pool), aggregator), analysis.format, 100)
    }
}
