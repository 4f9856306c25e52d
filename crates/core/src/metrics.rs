use crate::features::FrameFeatures;
use crate::formant::{FormantSet, DEFAULT_FORMANTS};
use crate::frame::FrameContext;
use crate::harmonics::{synthesized_series, HarmonicSeries};
use crate::session::{SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Jitter and shimmer, both in percent.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct JitterShimmer {
    pub jitter_local: f64,
    pub shimmer_local: f64,
}

/// The per-frame record that is broadcast and persisted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Metrics {
    pub session_id: SessionId,
    pub user_id: Option<UserId>,
    pub timestamp: String,
    pub pitch: f64,
    pub hnr: f64,
    pub harmonics: HarmonicSeries,
    pub formants: FormantSet,
    pub jitter_shimmer: JitterShimmer,
    pub praat_report: String,
    pub recording_path: Option<String>,
}

impl Metrics {
    pub fn from_features(context: FrameContext, features: FrameFeatures) -> Self {
        let FrameFeatures {
            pitch,
            harmonics,
            formants,
            quality,
        } = features;

        Self {
            session_id: context.session,
            user_id: context.user,
            timestamp: context.timestamp,
            pitch: pitch.into_value().frequency_hz,
            hnr: quality.hnr.into_value(),
            harmonics: harmonics.into_value(),
            formants: formants.into_value(),
            jitter_shimmer: JitterShimmer {
                jitter_local: quality.jitter.into_value(),
                shimmer_local: quality.shimmer.into_value(),
            },
            praat_report: quality.report.into_value(),
            recording_path: None,
        }
    }

    /// A record carrying only identity, used by tests and the in-memory store.
    pub fn empty(session_id: SessionId, timestamp: impl Into<String>) -> Self {
        Self {
            session_id,
            user_id: None,
            timestamp: timestamp.into(),
            pitch: 0.0,
            hnr: 0.0,
            harmonics: synthesized_series(0.0),
            formants: DEFAULT_FORMANTS,
            jitter_shimmer: JitterShimmer::default(),
            praat_report: String::new(),
            recording_path: None,
        }
    }

    /// The subset of columns a narrow insert keeps.
    pub fn narrowed(&self) -> Self {
        Self {
            user_id: None,
            jitter_shimmer: JitterShimmer::default(),
            praat_report: String::new(),
            recording_path: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{DspError, Outcome};
    use crate::pitch::{PitchEstimate, PitchSource};
    use crate::quality::VoiceQuality;

    #[test]
    fn from_features_takes_values_whether_measured_or_defaulted() {
        let features = FrameFeatures {
            pitch: Outcome::Measured(PitchEstimate {
                frequency_hz: 200.0,
                confidence: 0.95,
                source: PitchSource::Primary,
            }),
            harmonics: Outcome::Measured(synthesized_series(200.0)),
            formants: Outcome::Defaulted {
                value: DEFAULT_FORMANTS,
                reason: DspError::Degenerate,
            },
            quality: VoiceQuality {
                hnr: Outcome::Measured(18.0),
                jitter: Outcome::Measured(0.4),
                shimmer: Outcome::Defaulted {
                    value: 0.0,
                    reason: DspError::TooFewCycles { found: 2 },
                },
                report: Outcome::Measured("Pitch:".to_owned()),
            },
        };
        let context = FrameContext {
            session: SessionId::new("s").expect("valid"),
            user: Some(UserId::new("u").expect("valid")),
            timestamp: "t1".to_owned(),
        };

        let m = Metrics::from_features(context, features);
        assert_eq!(m.pitch, 200.0);
        assert_eq!(m.formants, DEFAULT_FORMANTS);
        assert_eq!(m.jitter_shimmer.jitter_local, 0.4);
        assert_eq!(m.jitter_shimmer.shimmer_local, 0.0);
        assert_eq!(m.recording_path, None);
        assert_eq!(m.user_id.as_ref().map(UserId::as_str), Some("u"));
    }

    #[test]
    fn narrowed_drops_optional_columns() {
        let mut m = Metrics::empty(SessionId::new("s").expect("valid"), "t");
        m.praat_report = "x".to_owned();
        m.jitter_shimmer.jitter_local = 1.0;
        m.pitch = 99.0;

        let n = m.narrowed();
        assert_eq!(n.pitch, 99.0);
        assert_eq!(n.praat_report, "");
        assert_eq!(n.jitter_shimmer, JitterShimmer::default());
    }
}
