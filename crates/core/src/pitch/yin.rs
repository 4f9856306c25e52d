use super::{PitchDetector, PitchEstimate, PitchSource};
use crate::config::DEFAULT_YIN_TOLERANCE;
use crate::dsp::{ensure_finite, parabolic_peak, DspError};

/// Smallest lag considered, in samples.
const MIN_LAG: usize = 2;

/// YIN fundamental frequency estimator over one whole buffer.
///
/// Confidence is `1 - d'(tau)` where `d'` is the cumulative mean normalized
/// difference at its global minimum; a clean periodic tone scores close to 1,
/// noise and silence score close to 0.
#[derive(Clone, Debug)]
pub struct Yin {
    tolerance: f64,
}

impl Yin {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

impl Default for Yin {
    fn default() -> Self {
        Self::new(DEFAULT_YIN_TOLERANCE)
    }
}

fn cumulative_mean_normalized_difference(samples: &[f32]) -> Vec<f64> {
    let half = samples.len() / 2;
    let mut cmnd = vec![1.0f64; half];
    let mut running = 0.0f64;

    for tau in 1..half {
        let mut diff = 0.0f64;
        for j in 0..half {
            let d = f64::from(samples[j]) - f64::from(samples[j + tau]);
            diff += d * d;
        }
        running += diff;
        cmnd[tau] = if running > 0.0 {
            diff * tau as f64 / running
        } else {
            1.0
        };
    }
    cmnd
}

impl PitchDetector for Yin {
    fn detect(&self, samples: &[f32], sample_rate_hz: u32) -> Result<PitchEstimate, DspError> {
        if samples.is_empty() {
            return Err(DspError::Empty);
        }
        let needed = 2 * (MIN_LAG + 2);
        if samples.len() < needed {
            return Err(DspError::TooShort { needed });
        }
        ensure_finite(samples, "yin input")?;

        let cmnd = cumulative_mean_normalized_difference(samples);
        let half = cmnd.len();

        let (best_tau, best_value) = (MIN_LAG..half)
            .map(|tau| (tau, cmnd[tau]))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or(DspError::TooShort { needed })?;

        if best_value >= 1.0 {
            return Ok(PitchEstimate::unvoiced());
        }

        // First dip under the threshold, walked down to its local minimum.
        let mut chosen = best_tau;
        let mut tau = MIN_LAG;
        while tau < half {
            if cmnd[tau] < self.tolerance {
                while tau + 1 < half && cmnd[tau + 1] < cmnd[tau] {
                    tau += 1;
                }
                chosen = tau;
                break;
            }
            tau += 1;
        }

        let (offset, _) = parabolic_peak(&cmnd, chosen);
        let period = chosen as f64 + offset;
        if period <= 0.0 {
            return Err(DspError::Unvoiced);
        }

        Ok(PitchEstimate {
            frequency_hz: f64::from(sample_rate_hz) / period,
            confidence: (1.0 - best_value).clamp(0.0, 1.0),
            source: PitchSource::Primary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_signals::{noise, sine, voiced, FRAME, SR};

    #[test]
    fn clean_sine_is_confident_and_accurate() {
        let est = Yin::default()
            .detect(&sine(220.0, 0.5, FRAME), SR)
            .expect("estimate");
        assert!((est.frequency_hz - 220.0).abs() < 1.0, "{est:?}");
        assert!(est.confidence > 0.9);
        assert_eq!(est.source, PitchSource::Primary);
    }

    #[test]
    fn harmonic_tone_reports_fundamental() {
        let est = Yin::default()
            .detect(&voiced(150.0, 0.6, FRAME), SR)
            .expect("estimate");
        assert!((est.frequency_hz - 150.0).abs() < 1.5, "{est:?}");
    }

    #[test]
    fn silence_has_zero_confidence() {
        let est = Yin::default().detect(&[0.0; FRAME], SR).expect("estimate");
        assert_eq!(est.frequency_hz, 0.0);
        assert_eq!(est.confidence, 0.0);
    }

    #[test]
    fn noise_is_not_confident() {
        let est = Yin::default()
            .detect(&noise(11, 0.5, FRAME), SR)
            .expect("estimate");
        assert!(est.confidence < 0.9, "{est:?}");
    }
}
