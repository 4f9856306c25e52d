use super::{PitchDetector, PitchEstimate, PitchSource};
use crate::dsp::{ensure_finite, mean_square, median, DspError};
use pitch_detection::detector::mcleod::McLeodDetector;
use pitch_detection::detector::PitchDetector as _;

pub const WINDOW_SIZE: usize = crate::config::FALLBACK_PITCH_WINDOW;
pub const HOP_SIZE: usize = 256;
pub const FLOOR_HZ: f64 = crate::config::ANALYSIS_FLOOR_HZ;
pub const CEILING_HZ: f64 = 600.0;

const POWER_THRESHOLD: f32 = 1e-3;
const CLARITY_THRESHOLD: f32 = 0.5;
const SILENCE_MEAN_SQUARE: f64 = 1e-7;

/// McLeod normalized-squared-difference tracker run over overlapping windows;
/// the estimate is the median of the in-range window pitches.
#[derive(Clone, Debug)]
pub struct WindowedMcLeod {
    window: usize,
    hop: usize,
    floor_hz: f64,
    ceiling_hz: f64,
}

impl WindowedMcLeod {
    pub fn new(window: usize, hop: usize, floor_hz: f64, ceiling_hz: f64) -> Self {
        Self {
            window: window.max(2),
            hop: hop.max(1),
            floor_hz,
            ceiling_hz,
        }
    }
}

impl Default for WindowedMcLeod {
    fn default() -> Self {
        Self::new(WINDOW_SIZE, HOP_SIZE, FLOOR_HZ, CEILING_HZ)
    }
}

impl PitchDetector for WindowedMcLeod {
    fn detect(&self, samples: &[f32], sample_rate_hz: u32) -> Result<PitchEstimate, DspError> {
        if samples.is_empty() {
            return Err(DspError::Empty);
        }
        if samples.len() < self.window {
            return Err(DspError::TooShort {
                needed: self.window,
            });
        }
        ensure_finite(samples, "fallback pitch input")?;

        let mut detector = McLeodDetector::<f32>::new(self.window, self.window / 2);
        let mut frequencies = Vec::new();
        let mut clarity_sum = 0.0f64;
        let mut any_energy = false;

        for start in (0..=samples.len() - self.window).step_by(self.hop) {
            let window = &samples[start..start + self.window];
            if mean_square(window) < SILENCE_MEAN_SQUARE {
                continue;
            }
            any_energy = true;

            let Some(pitch) = detector.get_pitch(
                window,
                sample_rate_hz as usize,
                POWER_THRESHOLD,
                CLARITY_THRESHOLD,
            ) else {
                continue;
            };
            let freq = f64::from(pitch.frequency);
            if freq.is_finite() && (self.floor_hz..=self.ceiling_hz).contains(&freq) {
                frequencies.push(freq);
                clarity_sum += f64::from(pitch.clarity);
            }
        }

        if !any_energy {
            return Err(DspError::Silent);
        }
        let count = frequencies.len();
        let frequency_hz = median(&mut frequencies).ok_or(DspError::Unvoiced)?;

        Ok(PitchEstimate {
            frequency_hz,
            confidence: (clarity_sum / count as f64).clamp(0.0, 1.0),
            source: PitchSource::Fallback,
        })
    }
}
