use super::{InsertShape, MetricsStore, PersistenceError};
use crate::metrics::Metrics;
use crate::session::SessionId;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
struct Row {
    metrics: Option<Metrics>,
    recording_path: Option<String>,
}

impl Row {
    fn materialize(&self) -> Option<Metrics> {
        self.metrics.as_ref().map(|m| Metrics {
            recording_path: self.recording_path.clone(),
            ..m.clone()
        })
    }
}

/// Process-local store with the same keyed-upsert semantics as the SQL store.
#[derive(Debug, Default)]
pub struct MemoryMetricsStore {
    rows: RwLock<BTreeMap<(SessionId, String), Row>>,
    narrow_only: bool,
}

impl MemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaves like a store whose schema predates the user, jitter/shimmer
    /// and report columns: full inserts fail, narrow inserts succeed.
    pub fn narrow_only() -> Self {
        Self {
            rows: RwLock::default(),
            narrow_only: true,
        }
    }

    fn insert(&self, metrics: Metrics, shape: InsertShape) -> Result<(), PersistenceError> {
        let metrics = match shape {
            InsertShape::Full if self.narrow_only => {
                return Err(PersistenceError::MissingColumn("jitter_shimmer".to_owned()));
            }
            InsertShape::Full => Metrics {
                recording_path: None,
                ..metrics
            },
            InsertShape::Narrow => metrics.narrowed(),
        };

        let key = (metrics.session_id.clone(), metrics.timestamp.clone());
        let mut rows = self.rows.write();
        let row = rows.entry(key).or_default();
        if row.metrics.is_some() {
            return Err(PersistenceError::Duplicate {
                session: metrics.session_id.to_string(),
                timestamp: metrics.timestamp,
            });
        }
        row.metrics = Some(metrics);
        Ok(())
    }

    fn attach(&self, session: SessionId, timestamp: String, path: String) -> Result<(), PersistenceError> {
        let mut rows = self.rows.write();
        let row = rows.entry((session.clone(), timestamp.clone())).or_default();
        match &row.recording_path {
            Some(existing) if *existing != path => Err(PersistenceError::AlreadyFinalized {
                session: session.to_string(),
                timestamp,
            }),
            _ => {
                row.recording_path = Some(path);
                Ok(())
            }
        }
    }

    fn history(&self, session: &SessionId, limit: usize) -> Vec<Metrics> {
        self.rows
            .read()
            .iter()
            .rev()
            .filter(|((s, _), _)| s == session)
            .filter_map(|(_, row)| row.materialize())
            .take(limit)
            .collect()
    }
}

impl MetricsStore for MemoryMetricsStore {
    fn insert_metrics(
        &self,
        metrics: Metrics,
        shape: InsertShape,
    ) -> BoxFuture<'_, Result<(), PersistenceError>> {
        async move { self.insert(metrics, shape) }.boxed()
    }

    fn update_recording_path(
        &self,
        session: SessionId,
        timestamp: String,
        path: String,
    ) -> BoxFuture<'_, Result<(), PersistenceError>> {
        async move { self.attach(session, timestamp, path) }.boxed()
    }

    fn fetch_latest_metrics(
        &self,
        session: SessionId,
    ) -> BoxFuture<'_, Result<Option<Metrics>, PersistenceError>> {
        async move { Ok(self.history(&session, 1).into_iter().next()) }.boxed()
    }

    fn fetch_history(
        &self,
        session: SessionId,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Metrics>, PersistenceError>> {
        async move { Ok(self.history(&session, limit)) }.boxed()
    }

    fn clear_history(&self, session: SessionId) -> BoxFuture<'_, Result<u64, PersistenceError>> {
        async move {
            let mut rows = self.rows.write();
            let before = rows.len();
            rows.retain(|(s, _), _| *s != session);
            Ok((before - rows.len()) as u64)
        }
        .boxed()
    }
}
