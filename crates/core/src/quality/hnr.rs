use crate::config::ANALYSIS_FLOOR_HZ;
use crate::dsp::{ensure_finite, normalized_correlation, parabolic_peak, peak_abs, DspError};

/// Cross-correlation harmonicity parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HnrSettings {
    pub floor_hz: f64,
    pub ceiling_hz: f64,
    pub time_step_s: f64,
    pub silence_threshold: f32,
    pub periods_per_window: f64,
}

impl Default for HnrSettings {
    fn default() -> Self {
        Self {
            floor_hz: ANALYSIS_FLOOR_HZ,
            ceiling_hz: 600.0,
            time_step_s: 0.01,
            silence_threshold: 0.1,
            periods_per_window: 1.0,
        }
    }
}

const MAX_CORRELATION: f64 = 1.0 - 1e-6;
const MIN_CORRELATION: f64 = 1e-6;

/// Mean harmonics-to-noise ratio in dB over the voiced windows of `samples`.
pub fn harmonicity_cc(
    samples: &[f32],
    sample_rate_hz: u32,
    settings: &HnrSettings,
) -> Result<f64, DspError> {
    if samples.is_empty() {
        return Err(DspError::Empty);
    }
    ensure_finite(samples, "hnr input")?;

    let global_peak = peak_abs(samples);
    if global_peak == 0.0 {
        return Err(DspError::Silent);
    }

    let sr = f64::from(sample_rate_hz);
    let window = ((settings.periods_per_window * sr / settings.floor_hz).round() as usize).max(2);
    let max_lag = (sr / settings.floor_hz).ceil() as usize;
    let min_lag = ((sr / settings.ceiling_hz).floor() as usize).max(1);
    let span = window + max_lag + 1;
    if samples.len() < span {
        return Err(DspError::TooShort { needed: span });
    }
    let step = ((settings.time_step_s * sr).round() as usize).max(1);

    let mut values = Vec::new();
    let mut correlations = vec![0.0f64; max_lag + 2];
    for start in (0..=samples.len() - span).step_by(step) {
        let segment = &samples[start..start + span];
        if peak_abs(segment) < settings.silence_threshold * global_peak {
            continue;
        }

        let head = &segment[..window];
        for lag in (min_lag - 1)..=(max_lag + 1) {
            correlations[lag] = normalized_correlation(head, &segment[lag..lag + window]);
        }
        let best_lag = (min_lag..=max_lag)
            .max_by(|&a, &b| correlations[a].total_cmp(&correlations[b]))
            .unwrap_or(min_lag);
        let (_, best) = parabolic_peak(&correlations, best_lag);

        if best > 0.0 {
            let r = best.clamp(MIN_CORRELATION, MAX_CORRELATION);
            values.push(10.0 * (r / (1.0 - r)).log10());
        }
    }

    if values.is_empty() {
        return Err(DspError::Unvoiced);
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}
