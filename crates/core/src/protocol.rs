//! JSON events exchanged with clients: `{"event": <name>, "data": {..}}`.

use crate::formant::Formant;
use crate::harmonics::Harmonic;
use crate::metrics::{JitterShimmer, Metrics};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RawAudio {
    pub audio: Vec<f32>,
    pub timestamp: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SaveRecording {
    pub timestamp: String,
    pub recording_path: String,
    #[serde(default)]
    pub pitch: Option<f64>,
    #[serde(default)]
    pub hnr: Option<f64>,
    #[serde(default)]
    pub harmonics: Option<Vec<Harmonic>>,
    #[serde(default)]
    pub formants: Option<Vec<Formant>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    RawAudio(RawAudio),
    SaveRecording(SaveRecording),
    StartRecording,
    StopRecording,
    ClearHistory,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnalysisPayload {
    pub pitch: f64,
    pub hnr: f64,
    pub harmonics: Vec<Harmonic>,
    pub formants: Vec<Formant>,
    pub jitter_shimmer: JitterShimmer,
    pub praat_report: String,
}

impl From<&Metrics> for AnalysisPayload {
    fn from(m: &Metrics) -> Self {
        Self {
            pitch: m.pitch,
            hnr: m.hnr,
            harmonics: m.harmonics.to_vec(),
            formants: m.formants.to_vec(),
            jitter_shimmer: m.jitter_shimmer,
            praat_report: m.praat_report.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryPayload {
    pub timestamp: String,
    pub pitch: Option<f64>,
    pub hnr: Option<f64>,
    pub harmonics: Option<Vec<Harmonic>>,
    pub formants: Option<Vec<Formant>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_shimmer: Option<JitterShimmer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub praat_report: Option<String>,
    pub recording_path: Option<String>,
}

impl From<&Metrics> for HistoryPayload {
    fn from(m: &Metrics) -> Self {
        Self {
            timestamp: m.timestamp.clone(),
            pitch: Some(m.pitch),
            hnr: Some(m.hnr),
            harmonics: Some(m.harmonics.to_vec()),
            formants: Some(m.formants.to_vec()),
            jitter_shimmer: Some(m.jitter_shimmer),
            praat_report: Some(m.praat_report.clone()),
            recording_path: m.recording_path.clone(),
        }
    }
}

impl From<&SaveRecording> for HistoryPayload {
    fn from(r: &SaveRecording) -> Self {
        Self {
            timestamp: r.timestamp.clone(),
            pitch: r.pitch,
            hnr: r.hnr,
            harmonics: r.harmonics.clone(),
            formants: r.formants.clone(),
            jitter_shimmer: None,
            praat_report: None,
            recording_path: Some(r.recording_path.clone()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingStatus {
    pub status: String,
    pub message: String,
}

impl RecordingStatus {
    pub fn started() -> Self {
        Self {
            status: "started".to_owned(),
            message: "Recording started".to_owned(),
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: "stopped".to_owned(),
            message: "Recording stopped".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    AudioAnalysis(AnalysisPayload),
    HistoryUpdate(HistoryPayload),
    RecordingStatus(RecordingStatus),
    HistoryCleared,
    Error(ErrorPayload),
}

impl OutboundEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AudioAnalysis(_) => "audio_analysis",
            Self::HistoryUpdate(_) => "history_update",
            Self::RecordingStatus(_) => "recording_status",
            Self::HistoryCleared => "history_cleared",
            Self::Error(_) => "error",
        }
    }
}
