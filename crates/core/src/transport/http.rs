use super::{AppState, LOG_TARGET};
use crate::config::MAX_HISTORY_LIMIT;
use crate::metrics::Metrics;
use crate::session::SessionId;
use crate::store::PersistenceError;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

impl HistoryQuery {
    /// Requested row count, or `default`, capped at [`MAX_HISTORY_LIMIT`].
    pub fn effective_limit(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).min(MAX_HISTORY_LIMIT)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("no metrics recorded for session {0}")]
    NotFound(String),
    #[error("invalid session id")]
    InvalidSession,
    #[error(transparent)]
    Store(#[from] PersistenceError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidSession => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(target: LOG_TARGET, error = %self, "read failed");
        }
        let body = Json(serde_json::json!({
            "status": "error",
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub(super) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let pool = state.pipeline.pool().stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": state.hub.room_count(),
        "queued": pool.queued,
        "completed": pool.completed,
        "failed": pool.failed,
        "dropped": pool.dropped,
        "rejected": pool.rejected,
        "shed_writes": state.pipeline.aggregator().shed_writes(),
    }))
}

pub(super) async fn latest(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Metrics>, ApiError> {
    let session = SessionId::new(session_id).map_err(|_| ApiError::InvalidSession)?;
    state
        .store
        .fetch_latest_metrics(session.clone())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(session.to_string()))
}

pub(super) async fn history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Metrics>>, ApiError> {
    let session = SessionId::new(session_id).map_err(|_| ApiError::InvalidSession)?;
    let limit = query.effective_limit(state.history_limit);
    let rows = state.store.fetch_history(session, limit).await?;
    Ok(Json(rows))
}
