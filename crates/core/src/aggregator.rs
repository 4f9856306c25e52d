//! Turns analysed frames into [`Metrics`], broadcasts them to the session and
//! persists them in the background.
//!
//! At most [`DEFAULT_MAX_PENDING_WRITES`] store writes are in flight at once;
//! past that a frame is still broadcast but its write is shed.

use crate::features::FrameFeatures;
use crate::frame::FrameContext;
use crate::hub::SessionHub;
use crate::metrics::Metrics;
use crate::protocol::{AnalysisPayload, HistoryPayload, OutboundEvent, SaveRecording};
use crate::session::SessionId;
use crate::store::{InsertShape, MetricsStore, PersistenceError};
use crate::util::{retry_with_backoff, RetryConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

const LOG_TARGET: &str = "aggregator";

pub const DEFAULT_MAX_PENDING_WRITES: usize = 256;

/// How a frame's metrics ended up in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistOutcome {
    Full,
    Narrow,
    Failed(PersistenceError),
}

/// A published frame; `persisted` resolves once the background write
/// settles, and is `None` when the write was shed under load.
pub struct Published {
    pub metrics: Metrics,
    pub persisted: Option<JoinHandle<PersistOutcome>>,
}

#[derive(Clone)]
pub struct FeatureAggregator {
    store: Arc<dyn MetricsStore>,
    hub: Arc<SessionHub>,
    retry: RetryConfig,
    writes: Arc<Semaphore>,
    shed: Arc<AtomicU64>,
}

impl FeatureAggregator {
    pub fn new(store: Arc<dyn MetricsStore>, hub: Arc<SessionHub>) -> Self {
        Self {
            store,
            hub,
            retry: RetryConfig::default(),
            writes: Arc::new(Semaphore::new(DEFAULT_MAX_PENDING_WRITES)),
            shed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Caps concurrent background writes. Zero is raised to one.
    pub fn with_max_pending_writes(mut self, max: usize) -> Self {
        self.writes = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Writes dropped because the store could not keep up.
    pub fn shed_writes(&self) -> u64 {
        self.shed.load(Ordering::Relaxed)
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn MetricsStore> {
        &self.store
    }

    /// Broadcasts `audio_analysis` then `history_update` to the frame's
    /// session and spawns the store write if a write slot is free. Must run
    /// inside a tokio runtime.
    pub fn publish(&self, context: FrameContext, features: FrameFeatures) -> Published {
        let metrics = Metrics::from_features(context, features);
        let session = metrics.session_id.clone();

        self.hub.emit(
            &session,
            OutboundEvent::AudioAnalysis(AnalysisPayload::from(&metrics)),
        );
        self.hub.emit(
            &session,
            OutboundEvent::HistoryUpdate(HistoryPayload::from(&metrics)),
        );

        let Ok(permit) = self.writes.clone().try_acquire_owned() else {
            let shed = self.shed.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                target: LOG_TARGET,
                session = %session,
                timestamp = %metrics.timestamp,
                shed,
                "store backlog full, metrics not persisted"
            );
            return Published {
                metrics,
                persisted: None,
            };
        };

        let store = self.store.clone();
        let retry = self.retry.clone();
        let record = metrics.clone();
        let persisted = tokio::spawn(async move {
            let outcome = persist(store.as_ref(), &retry, record).await;
            drop(permit);
            outcome
        });

        Published {
            metrics,
            persisted: Some(persisted),
        }
    }

    /// Attaches a recording to an existing (or future) metrics row and echoes
    /// the request back to the room.
    pub async fn finalize_recording(
        &self,
        session: &SessionId,
        request: &SaveRecording,
    ) -> Result<(), PersistenceError> {
        let store = &self.store;
        retry_with_backoff(
            &self.retry,
            || {
                store.update_recording_path(
                    session.clone(),
                    request.timestamp.clone(),
                    request.recording_path.clone(),
                )
            },
            PersistenceError::is_retryable,
        )
        .await?;

        tracing::info!(
            target: LOG_TARGET,
            session = %session,
            timestamp = %request.timestamp,
            path = %request.recording_path,
            "recording attached"
        );
        self.hub.emit(
            session,
            OutboundEvent::HistoryUpdate(HistoryPayload::from(request)),
        );
        Ok(())
    }

    pub async fn clear_history(&self, session: &SessionId) -> Result<u64, PersistenceError> {
        let removed = self.store.clear_history(session.clone()).await?;
        tracing::info!(target: LOG_TARGET, session = %session, removed, "history cleared");
        self.hub.emit(session, OutboundEvent::HistoryCleared);
        Ok(removed)
    }
}

/// Full insert with backoff on busy errors, then a single narrow attempt.
/// Failures are logged here and never surface to the caller.
pub async fn persist(store: &dyn MetricsStore, retry: &RetryConfig, metrics: Metrics) -> PersistOutcome {
    let session = metrics.session_id.clone();
    let timestamp = metrics.timestamp.clone();

    let full = retry_with_backoff(
        retry,
        || store.insert_metrics(metrics.clone(), InsertShape::Full),
        PersistenceError::is_retryable,
    )
    .await;
    let err = match full {
        Ok(()) => return PersistOutcome::Full,
        Err(e @ PersistenceError::Duplicate { .. }) => {
            tracing::warn!(target: LOG_TARGET, session = %session, timestamp = %timestamp, error = %e, "metrics already stored");
            return PersistOutcome::Failed(e);
        }
        Err(e) => e,
    };

    tracing::warn!(
        target: LOG_TARGET,
        session = %session,
        timestamp = %timestamp,
        error = %err,
        "full insert failed, retrying with narrow columns"
    );

    let narrow = retry_with_backoff(
        retry,
        || store.insert_metrics(metrics.clone(), InsertShape::Narrow),
        PersistenceError::is_retryable,
    )
    .await;
    match narrow {
        Ok(()) => PersistOutcome::Narrow,
        Err(e) => {
            tracing::error!(
                target: LOG_TARGET,
                session = %session,
                timestamp = %timestamp,
                error = %e,
                "narrow insert failed, metrics not persisted"
            );
            PersistOutcome::Failed(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::Outcome;
    use crate::formant::DEFAULT_FORMANTS;
    use crate::harmonics::synthesized_series;
    use crate::pitch::{PitchEstimate, PitchSource};
    use crate::quality::VoiceQuality;
    use crate::store::MemoryMetricsStore;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn sid(s: &str) -> SessionId {
        SessionId::new(s).expect("valid")
    }

    fn context(session: &str, ts: &str) -> FrameContext {
        FrameContext {
            session: sid(session),
            user: None,
            timestamp: ts.to_owned(),
        }
    }

    fn features(pitch: f64) -> FrameFeatures {
        FrameFeatures {
            pitch: Outcome::Measured(PitchEstimate {
                frequency_hz: pitch,
                confidence: 0.97,
                source: PitchSource::Primary,
            }),
            harmonics: Outcome::Measured(synthesized_series(pitch)),
            formants: Outcome::Measured(DEFAULT_FORMANTS),
            quality: VoiceQuality {
                hnr: Outcome::Measured(20.0),
                jitter: Outcome::Measured(0.3),
                shimmer: Outcome::Measured(1.9),
                report: Outcome::Measured("Pitch:".to_owned()),
            },
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(3, Duration::from_millis(1))
    }

    /// Scripted store: pops one result per insert call, records shapes.
    struct ScriptedStore {
        results: Mutex<Vec<Result<(), PersistenceError>>>,
        shapes: Mutex<Vec<InsertShape>>,
    }

    impl ScriptedStore {
        fn new(mut results: Vec<Result<(), PersistenceError>>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
                shapes: Mutex::new(Vec::new()),
            }
        }
    }

    impl MetricsStore for ScriptedStore {
        fn insert_metrics(&self, _: Metrics, shape: InsertShape) -> BoxFuture<'_, Result<(), PersistenceError>> {
            self.shapes.lock().push(shape);
            let result = self.results.lock().pop().unwrap_or(Ok(()));
            async move { result }.boxed()
        }

        fn update_recording_path(&self, _: SessionId, _: String, _: String) -> BoxFuture<'_, Result<(), PersistenceError>> {
            async { Err(PersistenceError::Database("read only".to_owned())) }.boxed()
        }

        fn fetch_latest_metrics(&self, _: SessionId) -> BoxFuture<'_, Result<Option<Metrics>, PersistenceError>> {
            async { Ok(None) }.boxed()
        }

        fn fetch_history(&self, _: SessionId, _: usize) -> BoxFuture<'_, Result<Vec<Metrics>, PersistenceError>> {
            async { Ok(Vec::new()) }.boxed()
        }

        fn clear_history(&self, _: SessionId) -> BoxFuture<'_, Result<u64, PersistenceError>> {
            async { Ok(0) }.boxed()
        }
    }

    fn sample() -> Metrics {
        Metrics::from_features(context("s", "t1"), features(200.0))
    }

    #[tokio::test]
    async fn full_insert_failure_falls_back_to_narrow() {
        let store = ScriptedStore::new(vec![Err(PersistenceError::MissingColumn("user_id".to_owned()))]);
        let outcome = persist(&store, &fast_retry(), sample()).await;
        assert_eq!(outcome, PersistOutcome::Narrow);
        assert_eq!(*store.shapes.lock(), [InsertShape::Full, InsertShape::Narrow]);
    }

    #[tokio::test]
    async fn busy_store_is_retried_before_falling_back() {
        let store = ScriptedStore::new(vec![Err(PersistenceError::Busy), Ok(())]);
        let outcome = persist(&store, &fast_retry(), sample()).await;
        assert_eq!(outcome, PersistOutcome::Full);
        assert_eq!(*store.shapes.lock(), [InsertShape::Full, InsertShape::Full]);
    }

    #[tokio::test]
    async fn second_failure_is_reported_not_raised() {
        let store = ScriptedStore::new(vec![
            Err(PersistenceError::Database("disk".to_owned())),
            Err(PersistenceError::Database("disk".to_owned())),
        ]);
        let outcome = persist(&store, &fast_retry(), sample()).await;
        assert_eq!(
            outcome,
            PersistOutcome::Failed(PersistenceError::Database("disk".to_owned()))
        );
    }

    #[tokio::test]
    async fn publish_broadcasts_analysis_then_history_to_the_session_only() {
        let hub = Arc::new(SessionHub::new(16));
        let store = Arc::new(MemoryMetricsStore::new());
        let aggregator = FeatureAggregator::new(store.clone(), hub.clone());
        let mut mine = hub.join(&sid("a"));
        let mut other = hub.join(&sid("b"));

        let published = aggregator.publish(context("a", "t1"), features(200.0));
        let persisted = published.persisted.expect("write admitted");
        assert_eq!(persisted.await.expect("task"), PersistOutcome::Full);

        let first = mine.try_recv().expect("analysis");
        let second = mine.try_recv().expect("history");
        assert_eq!(first.name(), "audio_analysis");
        let OutboundEvent::HistoryUpdate(history) = second else {
            panic!("expected history_update, got {second:?}");
        };
        assert_eq!(history.recording_path, None);
        assert_eq!(history.pitch, Some(200.0));
        assert!(matches!(other.try_recv(), Err(TryRecvError::Empty)));

        let stored = store.fetch_latest_metrics(sid("a")).await.expect("read");
        assert_eq!(stored, Some(published.metrics));
    }

    #[tokio::test]
    async fn finalize_attaches_path_and_echoes_request() {
        let hub = Arc::new(SessionHub::new(16));
        let store = Arc::new(MemoryMetricsStore::new());
        let aggregator = FeatureAggregator::new(store.clone(), hub.clone());
        let published = aggregator.publish(context("a", "t1"), features(180.0));
        published.persisted.expect("write admitted").await.expect("task");

        let mut rx = hub.join(&sid("a"));
        let request = SaveRecording {
            timestamp: "t1".to_owned(),
            recording_path: "/rec/t1.wav".to_owned(),
            pitch: Some(180.0),
            hnr: None,
            harmonics: None,
            formants: None,
        };
        aggregator.finalize_recording(&sid("a"), &request).await.expect("finalize");

        let OutboundEvent::HistoryUpdate(echo) = rx.try_recv().expect("echo") else {
            panic!("expected history_update");
        };
        assert_eq!(echo.recording_path.as_deref(), Some("/rec/t1.wav"));

        let stored = store.fetch_latest_metrics(sid("a")).await.expect("read").expect("row");
        assert_eq!(stored.recording_path.as_deref(), Some("/rec/t1.wav"));
        assert_eq!(stored.pitch, 180.0);
    }

    #[tokio::test]
    async fn failed_finalization_emits_nothing() {
        let hub = Arc::new(SessionHub::new(16));
        let aggregator = FeatureAggregator::new(Arc::new(ScriptedStore::new(Vec::new())), hub.clone())
            .with_retry(fast_retry());
        let mut rx = hub.join(&sid("a"));
        let request = SaveRecording {
            timestamp: "t1".to_owned(),
            recording_path: "/rec/t1.wav".to_owned(),
            pitch: None,
            hnr: None,
            harmonics: None,
            formants: None,
        };

        assert!(aggregator.finalize_recording(&sid("a"), &request).await.is_err());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn clear_history_notifies_the_room() {
        let hub = Arc::new(SessionHub::new(16));
        let store = Arc::new(MemoryMetricsStore::new());
        let aggregator = FeatureAggregator::new(store, hub.clone());
        aggregator
            .publish(context("a", "t1"), features(150.0))
            .persisted
            .expect("write admitted")
            .await
            .expect("task");

        let mut rx = hub.join(&sid("a"));
        assert_eq!(aggregator.clear_history(&sid("a")).await, Ok(1));
        assert_eq!(rx.try_recv().expect("event"), OutboundEvent::HistoryCleared);
    }

    /// Store whose inserts park until released.
    struct StalledStore {
        release: tokio::sync::Notify,
    }

    impl MetricsStore for StalledStore {
        fn insert_metrics(&self, _: Metrics, _: InsertShape) -> BoxFuture<'_, Result<(), PersistenceError>> {
            async move {
                self.release.notified().await;
                Ok(())
            }
            .boxed()
        }

        fn update_recording_path(&self, _: SessionId, _: String, _: String) -> BoxFuture<'_, Result<(), PersistenceError>> {
            async { Ok(()) }.boxed()
        }

        fn fetch_latest_metrics(&self, _: SessionId) -> BoxFuture<'_, Result<Option<Metrics>, PersistenceError>> {
            async { Ok(None) }.boxed()
        }

        fn fetch_history(&self, _: SessionId, _: usize) -> BoxFuture<'_, Result<Vec<Metrics>, PersistenceError>> {
            async { Ok(Vec::new()) }.boxed()
        }

        fn clear_history(&self, _: SessionId) -> BoxFuture<'_, Result<u64, PersistenceError>> {
            async { Ok(0) }.boxed()
        }
    }

    #[tokio::test]
    async fn slow_store_sheds_writes_past_the_backlog_but_still_broadcasts() {
        let hub = Arc::new(SessionHub::new(16));
        let store = Arc::new(StalledStore {
            release: tokio::sync::Notify::new(),
        });
        let aggregator = FeatureAggregator::new(store.clone(), hub.clone()).with_max_pending_writes(2);
        let mut rx = hub.join(&sid("a"));

        let first = aggregator.publish(context("a", "t1"), features(200.0));
        let second = aggregator.publish(context("a", "t2"), features(200.0));
        let third = aggregator.publish(context("a", "t3"), features(200.0));

        assert!(first.persisted.is_some());
        assert!(second.persisted.is_some());
        assert!(third.persisted.is_none());
        assert_eq!(aggregator.shed_writes(), 1);
        for _ in 0..6 {
            rx.try_recv().expect("every frame is broadcast");
        }

        // a finished write frees its slot for the next frame
        let first = first.persisted.expect("admitted");
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while !first.is_finished() {
                store.release.notify_waiters();
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(drained.is_ok(), "stalled write never completed");
        let fourth = aggregator.publish(context("a", "t4"), features(200.0));
        assert!(fourth.persisted.is_some());
    }
}
