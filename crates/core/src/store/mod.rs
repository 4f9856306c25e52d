//! Persistence gateway for per-frame metrics.
//!
//! Rows are keyed by `(session, timestamp)`. Metrics and the recording path
//! arrive independently and in either order; both writes are upserts on that
//! key so neither can clobber the other.

mod memory;
#[cfg(feature = "libsql")]
mod sql;

pub use memory::MemoryMetricsStore;
#[cfg(feature = "libsql")]
pub use sql::{SqlMetricsStore, SqlPool};

use crate::config::StoreConfig;
use crate::metrics::Metrics;
use crate::session::SessionId;
use futures::future::BoxFuture;
use std::sync::Arc;

const LOG_TARGET: &str = "store";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("store is busy")]
    Busy,
    #[error("store schema lacks a column: {0}")]
    MissingColumn(String),
    #[error("metrics already recorded for session {session} at {timestamp}")]
    Duplicate { session: String, timestamp: String },
    #[error("a different recording is already attached for session {session} at {timestamp}")]
    AlreadyFinalized { session: String, timestamp: String },
    #[error("database error: {0}")]
    Database(String),
    #[error("could not encode {0}")]
    Encode(String),
    #[error("could not decode stored row: {0}")]
    Decode(String),
    #[error("connection pool closed")]
    PoolClosed,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    /// Transient conditions worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Which columns an insert writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertShape {
    /// Every metric column plus the user id.
    Full,
    /// Only pitch, hnr, harmonics and formants; for stores whose schema
    /// predates the newer columns.
    Narrow,
}

pub trait MetricsStore: Send + Sync {
    fn insert_metrics(
        &self,
        metrics: Metrics,
        shape: InsertShape,
    ) -> BoxFuture<'_, Result<(), PersistenceError>>;

    /// Attaches a recording path to the row at `(session, timestamp)`,
    /// creating a placeholder row when the metrics have not landed yet.
    fn update_recording_path(
        &self,
        session: SessionId,
        timestamp: String,
        path: String,
    ) -> BoxFuture<'_, Result<(), PersistenceError>>;

    fn fetch_latest_metrics(
        &self,
        session: SessionId,
    ) -> BoxFuture<'_, Result<Option<Metrics>, PersistenceError>>;

    /// Newest first, at most `limit` rows.
    fn fetch_history(
        &self,
        session: SessionId,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Metrics>, PersistenceError>>;

    fn clear_history(&self, session: SessionId) -> BoxFuture<'_, Result<u64, PersistenceError>>;
}

/// Opens the configured store: SQL when a database path is set, otherwise
/// in-memory.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn MetricsStore>, PersistenceError> {
    match &config.database_path {
        None => {
            tracing::warn!(
                target: LOG_TARGET,
                "no database path configured, metrics are kept in memory only"
            );
            Ok(Arc::new(MemoryMetricsStore::new()))
        }
        #[cfg(feature = "libsql")]
        Some(path) => {
            let store = SqlMetricsStore::open(path, config.max_connections).await?;
            store.initialize_schema().await?;
            tracing::info!(
                target: LOG_TARGET,
                path = %path,
                max_connections = config.max_connections,
                "sql metrics store ready"
            );
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "libsql"))]
        Some(path) => Err(PersistenceError::Unavailable(format!(
            "{path}: built without the libsql feature"
        ))),
    }
}
