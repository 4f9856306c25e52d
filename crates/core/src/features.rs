use crate::config::AnalysisConfig;
use crate::dsp::Outcome;
use crate::formant::{FormantEstimator, FormantSet};
use crate::frame::AudioFrame;
use crate::harmonics::{HarmonicExtractor, HarmonicSeries};
use crate::pitch::{GatedPitchEstimator, PitchEstimate, WindowedMcLeod, Yin};
use crate::quality::{VoiceQuality, VoiceQualityAnalyzer};

const LOG_TARGET: &str = "features";

/// Everything measured on one frame, each stage with its own outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameFeatures {
    pub pitch: Outcome<PitchEstimate>,
    pub harmonics: Outcome<HarmonicSeries>,
    pub formants: Outcome<FormantSet>,
    pub quality: VoiceQuality,
}

impl FrameFeatures {
    fn log_defaults(&self, frame: &AudioFrame) {
        let stages = [
            ("pitch", self.pitch.reason()),
            ("harmonics", self.harmonics.reason()),
            ("formants", self.formants.reason()),
            ("hnr", self.quality.hnr.reason()),
            ("jitter", self.quality.jitter.reason()),
            ("shimmer", self.quality.shimmer.reason()),
            ("report", self.quality.report.reason()),
        ];
        for (stage, reason) in stages {
            if let Some(reason) = reason {
                tracing::debug!(
                    target: LOG_TARGET,
                    session = %frame.session(),
                    timestamp = %frame.context.timestamp,
                    stage,
                    %reason,
                    "stage defaulted"
                );
            }
        }
    }
}

/// CPU-bound per-frame analysis, run on the worker pool.
pub trait FrameAnalyzer: Send + Sync {
    fn analyze(&self, frame: &AudioFrame) -> FrameFeatures;
}

pub struct FeatureExtractor {
    pitch: GatedPitchEstimator<Yin, WindowedMcLeod>,
    harmonics: HarmonicExtractor,
    formants: FormantEstimator,
    quality: VoiceQualityAnalyzer,
}

impl FeatureExtractor {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            pitch: GatedPitchEstimator::from_config(config),
            harmonics: HarmonicExtractor::new(&config.format),
            formants: FormantEstimator::default(),
            quality: VoiceQualityAnalyzer::default(),
        }
    }
}

impl FrameAnalyzer for FeatureExtractor {
    fn analyze(&self, frame: &AudioFrame) -> FrameFeatures {
        let sr = frame.sample_rate_hz;
        let samples = frame.samples.as_slice();

        let pitch = self.pitch.estimate(samples, sr);
        let harmonics = self
            .harmonics
            .extract(samples, pitch.value().frequency_hz, sr);
        let formants = self.formants.estimate(samples, sr);
        let quality = self.quality.analyze(samples, sr);

        let features = FrameFeatures {
            pitch,
            harmonics,
            formants,
            quality,
        };
        features.log_defaults(frame);
        features
    }
}
