mod mcleod;
mod yin;

pub use mcleod::WindowedMcLeod;
pub use yin::Yin;

use crate::config::AnalysisConfig;
use crate::dsp::{isolate, DspError, Outcome};
use serde::{Deserialize, Serialize};

const LOG_TARGET: &str = "pitch";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PitchSource {
    Primary,
    Fallback,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PitchEstimate {
    pub frequency_hz: f64,
    pub confidence: f64,
    pub source: PitchSource,
}

impl PitchEstimate {
    pub fn unvoiced() -> Self {
        Self {
            frequency_hz: 0.0,
            confidence: 0.0,
            source: PitchSource::Primary,
        }
    }
}

pub trait PitchDetector: Send + Sync {
    fn detect(&self, samples: &[f32], sample_rate_hz: u32) -> Result<PitchEstimate, DspError>;
}

/// Acceptance rule for the primary estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PitchGate {
    pub min_confidence: f64,
    pub min_frequency_hz: f64,
}

impl PitchGate {
    pub fn accepts(&self, estimate: &PitchEstimate) -> bool {
        estimate.confidence > self.min_confidence && estimate.frequency_hz > self.min_frequency_hz
    }
}

impl Default for PitchGate {
    fn default() -> Self {
        Self::from(&AnalysisConfig::default())
    }
}

impl From<&AnalysisConfig> for PitchGate {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            min_confidence: config.pitch_min_confidence,
            min_frequency_hz: config.pitch_min_hz,
        }
    }
}

/// Runs the primary estimator and keeps its answer only when the gate accepts
/// it; otherwise the fallback's answer stands, and when neither produces a
/// pitch the frame is reported unvoiced at 0 Hz.
pub struct GatedPitchEstimator<P, F> {
    primary: P,
    fallback: F,
    gate: PitchGate,
}

impl<P, F> GatedPitchEstimator<P, F>
where
    P: PitchDetector,
    F: PitchDetector,
{
    pub fn new(primary: P, fallback: F, gate: PitchGate) -> Self {
        Self {
            primary,
            fallback,
            gate,
        }
    }

    pub fn estimate(&self, samples: &[f32], sample_rate_hz: u32) -> Outcome<PitchEstimate> {
        match isolate("pitch.primary", || self.primary.detect(samples, sample_rate_hz)) {
            Ok(estimate) if self.gate.accepts(&estimate) => return Outcome::Measured(estimate),
            Ok(estimate) => tracing::trace!(
                target: LOG_TARGET,
                frequency_hz = estimate.frequency_hz,
                confidence = estimate.confidence,
                "primary estimate below gate"
            ),
            Err(e) => tracing::debug!(target: LOG_TARGET, error = %e, "primary estimator failed"),
        }

        match isolate("pitch.fallback", || self.fallback.detect(samples, sample_rate_hz)) {
            Ok(estimate) if estimate.frequency_hz > 0.0 => Outcome::Measured(PitchEstimate {
                source: PitchSource::Fallback,
                ..estimate
            }),
            Ok(_) => Outcome::Defaulted {
                value: PitchEstimate::unvoiced(),
                reason: DspError::Unvoiced,
            },
            Err(reason) => Outcome::Defaulted {
                value: PitchEstimate::unvoiced(),
                reason,
            },
        }
    }
}

impl GatedPitchEstimator<Yin, WindowedMcLeod> {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(
            Yin::new(config.yin_tolerance),
            WindowedMcLeod::default(),
            PitchGate::from(config),
        )
    }
}
