use crate::config::{OverloadPolicy, WorkerPoolConfig};
use crate::features::{FeatureExtractor, FrameAnalyzer, FrameFeatures};
use crate::frame::AudioFrame;
use crate::util::RingBuffer;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

const LOG_TARGET: &str = "pipeline::pool";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("analysis queue is full ({capacity} frames)")]
    QueueFull { capacity: usize },
    #[error("frame dropped before analysis")]
    Dropped,
    #[error("analysis pool is shut down")]
    ShutDown,
    #[error("analysis panicked: {0}")]
    Panicked(String),
    #[error("failed to start analysis worker: {0}")]
    Spawn(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub rejected: u64,
}

struct Job {
    frame: AudioFrame,
    reply: oneshot::Sender<Result<FrameFeatures, PoolError>>,
}

struct Shared {
    queue: Mutex<RingBuffer<Job>>,
    available: Condvar,
    shutdown: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

/// Handle to a submitted frame's analysis.
#[derive(Debug)]
pub struct PendingAnalysis(oneshot::Receiver<Result<FrameFeatures, PoolError>>);

impl PendingAnalysis {
    /// Resolves to [`PoolError::Dropped`] if the frame was evicted or the
    /// pool shut down before a worker reached it, and to
    /// [`PoolError::Panicked`] if the analyzer panicked on it.
    pub async fn wait(self) -> Result<FrameFeatures, PoolError> {
        self.0.await.map_err(|_| PoolError::Dropped)?
    }
}

/// Fixed set of OS threads draining a bounded frame queue.
pub struct AnalysisPool {
    shared: Arc<Shared>,
    policy: OverloadPolicy,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AnalysisPool {
    pub fn start(
        config: &WorkerPoolConfig,
        analyzer: Arc<dyn FrameAnalyzer>,
    ) -> Result<Self, PoolError> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(RingBuffer::new(config.queue_capacity.max(1))),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });

        let pool = Self {
            shared,
            policy: config.policy,
            workers: Mutex::new(Vec::with_capacity(config.workers)),
        };

        for i in 0..config.workers.max(1) {
            let shared = pool.shared.clone();
            let analyzer = analyzer.clone();
            let handle = std::thread::Builder::new()
                .name(format!("vox-analysis-{i}"))
                .spawn(move || worker_loop(&shared, analyzer.as_ref()))
                .map_err(|e| PoolError::Spawn(e.to_string()))?;
            pool.workers.lock().push(handle);
        }

        tracing::info!(
            target: LOG_TARGET,
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            policy = %config.policy,
            "analysis pool started"
        );
        Ok(pool)
    }

    pub fn with_feature_extractor(
        config: &WorkerPoolConfig,
        extractor: FeatureExtractor,
    ) -> Result<Self, PoolError> {
        Self::start(config, Arc::new(extractor))
    }

    pub fn submit(&self, frame: AudioFrame) -> Result<PendingAnalysis, PoolError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::ShutDown);
        }

        let (reply, rx) = oneshot::channel();
        let evicted = {
            let mut queue = self.shared.queue.lock();
            if queue.is_full() && self.policy == OverloadPolicy::RejectNew {
                self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: LOG_TARGET,
                    session = %frame.session(),
                    timestamp = %frame.context.timestamp,
                    "analysis queue full, rejecting frame"
                );
                return Err(PoolError::QueueFull {
                    capacity: queue.capacity(),
                });
            }
            queue.push(Job { frame, reply })
        };
        self.shared.available.notify_one();

        if let Some(job) = evicted {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target: LOG_TARGET,
                session = %job.frame.session(),
                timestamp = %job.frame.context.timestamp,
                "analysis queue full, dropped oldest frame"
            );
        }
        Ok(PendingAnalysis(rx))
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queued: self.shared.queue.lock().len(),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting frames, abandons queued ones and joins the workers.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let abandoned = self.shared.queue.lock().drain();
        self.shared.available.notify_all();

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!(target: LOG_TARGET, "analysis worker panicked");
            }
        }
        tracing::info!(
            target: LOG_TARGET,
            abandoned = abandoned.len(),
            "analysis pool stopped"
        );
    }
}

impl Drop for AnalysisPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared, analyzer: &dyn FrameAnalyzer) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if let Some(job) = queue.pop() {
                    break job;
                }
                shared.available.wait(&mut queue);
            }
        };

        let result = match catch_unwind(AssertUnwindSafe(|| analyzer.analyze(&job.frame))) {
            Ok(features) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
                Ok(features)
            }
            Err(payload) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                let message = crate::dsp::panic_message(payload.as_ref());
                tracing::error!(
                    target: LOG_TARGET,
                    session = %job.frame.session(),
                    timestamp = %job.frame.context.timestamp,
                    panic = %message,
                    "analysis panicked, frame discarded"
                );
                Err(PoolError::Panicked(message))
            }
        };
        if job.reply.send(result).is_err() {
            tracing::debug!(
                target: LOG_TARGET,
                session = %job.frame.session(),
                "analysis finished after caller went away"
            );
        }
    }
}
