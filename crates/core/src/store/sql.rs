//! libsql-backed metrics store.

use super::{InsertShape, MetricsStore, PersistenceError, LOG_TARGET};
use crate::formant::{Formant, FormantSet};
use crate::harmonics::{synthesized_series, Harmonic, HarmonicSeries};
use crate::metrics::{JitterShimmer, Metrics};
use crate::session::{SessionId, UserId};
use futures::future::BoxFuture;
use futures::FutureExt;
use libsql::{params, Builder, Connection, Database, Row};
use serde::de::DeserializeOwned;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS vocal_data (
    session_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    pitch REAL,
    hnr REAL,
    harmonics TEXT,
    formants TEXT,
    recording_path TEXT,
    PRIMARY KEY (session_id, timestamp)
)
"#;

/// Columns added after the first release of the table.
const ADDED_COLUMNS: [(&str, &str); 3] = [
    ("user_id", "TEXT"),
    ("jitter_shimmer", "TEXT"),
    ("praat_report", "TEXT"),
];

const INSERT_FULL: &str = r#"
INSERT INTO vocal_data
    (session_id, timestamp, user_id, pitch, hnr, harmonics, formants, jitter_shimmer, praat_report)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT (session_id, timestamp) DO UPDATE SET
    user_id = excluded.user_id,
    pitch = excluded.pitch,
    hnr = excluded.hnr,
    harmonics = excluded.harmonics,
    formants = excluded.formants,
    jitter_shimmer = excluded.jitter_shimmer,
    praat_report = excluded.praat_report
WHERE vocal_data.pitch IS NULL
"#;

const INSERT_NARROW: &str = r#"
INSERT INTO vocal_data (session_id, timestamp, pitch, hnr, harmonics, formants)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT (session_id, timestamp) DO UPDATE SET
    pitch = excluded.pitch,
    hnr = excluded.hnr,
    harmonics = excluded.harmonics,
    formants = excluded.formants
WHERE vocal_data.pitch IS NULL
"#;

const ATTACH_RECORDING: &str = r#"
INSERT INTO vocal_data (session_id, timestamp, recording_path)
VALUES (?1, ?2, ?3)
ON CONFLICT (session_id, timestamp) DO UPDATE SET
    recording_path = excluded.recording_path
WHERE vocal_data.recording_path IS NULL
   OR vocal_data.recording_path = excluded.recording_path
"#;

const SELECT_HISTORY: &str = r#"
SELECT session_id, user_id, timestamp, pitch, hnr, harmonics, formants,
       jitter_shimmer, praat_report, recording_path
FROM vocal_data
WHERE session_id = ?1 AND pitch IS NOT NULL
ORDER BY timestamp DESC
LIMIT ?2
"#;

/// Shared database handle that caps concurrent connections.
#[derive(Clone)]
pub struct SqlPool {
    db: Arc<Database>,
    permits: Arc<Semaphore>,
}

/// A connection that returns its permit to the pool when dropped.
pub struct PooledConnection {
    conn: Connection,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl SqlPool {
    pub async fn open(path: &str, max_connections: usize) -> Result<Self, PersistenceError> {
        let db = Builder::new_local(path).build().await.map_err(classify)?;
        Ok(Self {
            db: Arc::new(db),
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
        })
    }

    pub async fn acquire(&self) -> Result<PooledConnection, PersistenceError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PersistenceError::PoolClosed)?;
        let conn = self.db.connect().map_err(classify)?;
        Ok(PooledConnection {
            conn,
            _permit: permit,
        })
    }
}

pub struct SqlMetricsStore {
    pool: SqlPool,
}

impl SqlMetricsStore {
    pub async fn open(path: &str, max_connections: usize) -> Result<Self, PersistenceError> {
        Ok(Self {
            pool: SqlPool::open(path, max_connections).await?,
        })
    }

    pub fn pool(&self) -> &SqlPool {
        &self.pool
    }

    /// Creates the table if needed and adds any columns an older table lacks.
    pub async fn initialize_schema(&self) -> Result<(), PersistenceError> {
        let conn = self.pool.acquire().await?;
        conn.execute(CREATE_TABLE, ()).await.map_err(classify)?;

        let existing = table_columns(&conn).await?;
        for (name, ty) in ADDED_COLUMNS {
            if existing.iter().any(|c| c == name) {
                continue;
            }
            tracing::info!(target: LOG_TARGET, column = name, "adding column to vocal_data");
            conn.execute(&format!("ALTER TABLE vocal_data ADD COLUMN {name} {ty}"), ())
                .await
                .map_err(classify)?;
        }
        Ok(())
    }

    async fn insert(&self, metrics: Metrics, shape: InsertShape) -> Result<(), PersistenceError> {
        let conn = self.pool.acquire().await?;
        let session = metrics.session_id.to_string();
        let harmonics = encode("harmonics", &metrics.harmonics)?;
        let formants = encode("formants", &metrics.formants)?;

        let changed = match shape {
            InsertShape::Full => {
                let jitter_shimmer = encode("jitter_shimmer", &metrics.jitter_shimmer)?;
                conn.execute(
                    INSERT_FULL,
                    params![
                        session.clone(),
                        metrics.timestamp.clone(),
                        metrics.user_id.as_ref().map(UserId::to_string),
                        metrics.pitch,
                        metrics.hnr,
                        harmonics,
                        formants,
                        jitter_shimmer,
                        metrics.praat_report.clone()
                    ],
                )
                .await
            }
            InsertShape::Narrow => {
                conn.execute(
                    INSERT_NARROW,
                    params![
                        session.clone(),
                        metrics.timestamp.clone(),
                        metrics.pitch,
                        metrics.hnr,
                        harmonics,
                        formants
                    ],
                )
                .await
            }
        }
        .map_err(classify)?;

        if changed == 0 {
            return Err(PersistenceError::Duplicate {
                session,
                timestamp: metrics.timestamp,
            });
        }
        Ok(())
    }

    async fn attach(
        &self,
        session: SessionId,
        timestamp: String,
        path: String,
    ) -> Result<(), PersistenceError> {
        let conn = self.pool.acquire().await?;
        let changed = conn
            .execute(
                ATTACH_RECORDING,
                params![session.to_string(), timestamp.clone(), path],
            )
            .await
            .map_err(classify)?;
        if changed == 0 {
            return Err(PersistenceError::AlreadyFinalized {
                session: session.to_string(),
                timestamp,
            });
        }
        Ok(())
    }

    async fn history(&self, session: &SessionId, limit: usize) -> Result<Vec<Metrics>, PersistenceError> {
        let conn = self.pool.acquire().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = conn
            .query(SELECT_HISTORY, params![session.to_string(), limit])
            .await
            .map_err(classify)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(classify)? {
            out.push(decode_row(&row)?);
        }
        Ok(out)
    }

    async fn clear(&self, session: &SessionId) -> Result<u64, PersistenceError> {
        let conn = self.pool.acquire().await?;
        conn.execute(
            "DELETE FROM vocal_data WHERE session_id = ?1",
            params![session.to_string()],
        )
        .await
        .map_err(classify)
    }
}

impl MetricsStore for SqlMetricsStore {
    fn insert_metrics(
        &self,
        metrics: Metrics,
        shape: InsertShape,
    ) -> BoxFuture<'_, Result<(), PersistenceError>> {
        self.insert(metrics, shape).boxed()
    }

    fn update_recording_path(
        &self,
        session: SessionId,
        timestamp: String,
        path: String,
    ) -> BoxFuture<'_, Result<(), PersistenceError>> {
        self.attach(session, timestamp, path).boxed()
    }

    fn fetch_latest_metrics(
        &self,
        session: SessionId,
    ) -> BoxFuture<'_, Result<Option<Metrics>, PersistenceError>> {
        async move { Ok(self.history(&session, 1).await?.into_iter().next()) }.boxed()
    }

    fn fetch_history(
        &self,
        session: SessionId,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Metrics>, PersistenceError>> {
        async move { self.history(&session, limit).await }.boxed()
    }

    fn clear_history(&self, session: SessionId) -> BoxFuture<'_, Result<u64, PersistenceError>> {
        async move { self.clear(&session).await }.boxed()
    }
}

async fn table_columns(conn: &Connection) -> Result<Vec<String>, PersistenceError> {
    let mut rows = conn
        .query("PRAGMA table_info(vocal_data)", ())
        .await
        .map_err(classify)?;
    let mut names = Vec::new();
    while let Some(row) = rows.next().await.map_err(classify)? {
        names.push(row.get::<String>(1).map_err(classify)?);
    }
    Ok(names)
}

fn classify(e: libsql::Error) -> PersistenceError {
    let message = e.to_string();
    if message.contains("database is locked") || message.contains("database is busy") {
        PersistenceError::Busy
    } else if message.contains("no such column") || message.contains("has no column named") {
        PersistenceError::MissingColumn(message)
    } else {
        PersistenceError::Database(message)
    }
}

fn encode<T: serde::Serialize>(what: &str, value: &T) -> Result<String, PersistenceError> {
    serde_json::to_string(value).map_err(|e| PersistenceError::Encode(format!("{what}: {e}")))
}

fn decode_json<T: DeserializeOwned>(what: &str, raw: Option<String>) -> Result<Option<T>, PersistenceError> {
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| PersistenceError::Decode(format!("{what}: {e}")))
}

fn decode_row(row: &Row) -> Result<Metrics, PersistenceError> {
    let session: String = row.get(0).map_err(classify)?;
    let user: Option<String> = row.get(1).map_err(classify)?;
    let timestamp: String = row.get(2).map_err(classify)?;
    let pitch: Option<f64> = row.get(3).map_err(classify)?;
    let hnr: Option<f64> = row.get(4).map_err(classify)?;
    let pitch = pitch.unwrap_or_default();

    let harmonics: HarmonicSeries = match decode_json::<Vec<Harmonic>>("harmonics", row.get(5).map_err(classify)?)? {
        Some(v) => v
            .try_into()
            .map_err(|v: Vec<Harmonic>| PersistenceError::Decode(format!("expected 5 harmonics, got {}", v.len())))?,
        None => synthesized_series(pitch),
    };
    let formants: FormantSet = match decode_json::<Vec<Formant>>("formants", row.get(6).map_err(classify)?)? {
        Some(v) => v
            .try_into()
            .map_err(|v: Vec<Formant>| PersistenceError::Decode(format!("expected 3 formants, got {}", v.len())))?,
        None => crate::formant::DEFAULT_FORMANTS,
    };
    let jitter_shimmer: Option<JitterShimmer> = decode_json("jitter_shimmer", row.get(7).map_err(classify)?)?;
    let praat_report: Option<String> = row.get(8).map_err(classify)?;
    let recording_path: Option<String> = row.get(9).map_err(classify)?;

    Ok(Metrics {
        session_id: SessionId::new(session).map_err(|e| PersistenceError::Decode(e.to_string()))?,
        user_id: user.and_then(|u| UserId::new(u).ok()),
        timestamp,
        pitch,
        hnr: hnr.unwrap_or_default(),
        harmonics,
        formants,
        jitter_shimmer: jitter_shimmer.unwrap_or_default(),
        praat_report: praat_report.unwrap_or_default(),
        recording_path,
    })
}
