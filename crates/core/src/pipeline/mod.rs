//! Per-frame flow: analysis pool, then aggregation.

mod pool;

pub use pool::{AnalysisPool, PendingAnalysis, PoolError, PoolStats};

use crate::aggregator::FeatureAggregator;
use crate::frame::AudioFrame;
use crate::metrics::Metrics;
use std::sync::Arc;
use tokio::task::JoinHandle;

const LOG_TARGET: &str = "pipeline";

#[derive(Clone)]
pub struct Pipeline {
    pool: Arc<AnalysisPool>,
    aggregator: FeatureAggregator,
}

impl Pipeline {
    pub fn new(pool: Arc<AnalysisPool>, aggregator: FeatureAggregator) -> Self {
        Self { pool, aggregator }
    }

    pub fn pool(&self) -> &AnalysisPool {
        &self.pool
    }

    pub fn aggregator(&self) -> &FeatureAggregator {
        &self.aggregator
    }

    /// Queues a frame for analysis. The returned task resolves to the
    /// published metrics, or `None` when the frame was dropped before a
    /// worker reached it or its analysis panicked. An evicted frame releases
    /// its task, so live tasks never outnumber queued plus running frames.
    pub fn submit(&self, frame: AudioFrame) -> Result<JoinHandle<Option<Metrics>>, PoolError> {
        let context = frame.context.clone();
        let pending = self.pool.submit(frame)?;
        let aggregator = self.aggregator.clone();

        Ok(tokio::spawn(async move {
            match pending.wait().await {
                Ok(features) => Some(aggregator.publish(context, features).metrics),
                Err(e) => {
                    tracing::debug!(
                        target: LOG_TARGET,
                        session = %context.session,
                        timestamp = %context.timestamp,
                        error = %e,
                        "frame not analysed"
                    );
                    None
                }
            }
        }))
    }
}
