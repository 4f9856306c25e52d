use crate::config::ANALYSIS_FLOOR_HZ;
use crate::dsp::{ensure_finite, normalized_correlation, parabolic_peak, peak_abs, DspError};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PulseSettings {
    pub floor_hz: f64,
    pub ceiling_hz: f64,
    pub voicing_threshold: f64,
    pub silence_threshold: f32,
}

impl Default for PulseSettings {
    fn default() -> Self {
        Self {
            floor_hz: ANALYSIS_FLOOR_HZ,
            ceiling_hz: 500.0,
            voicing_threshold: 0.45,
            silence_threshold: 0.03,
        }
    }
}

/// Glottal closure instants and the signal amplitude at each.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PulseTrain {
    pub times_s: Vec<f64>,
    pub amplitudes: Vec<f64>,
}

impl PulseTrain {
    pub fn len(&self) -> usize {
        self.times_s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times_s.is_empty()
    }

    pub fn periods(&self) -> impl Iterator<Item = f64> + '_ {
        self.times_s.windows(2).map(|w| w[1] - w[0])
    }
}

/// Dominant period in samples from the first interior autocorrelation peak
/// that comes close to the strongest one; `None` when unvoiced.
fn period_estimate(samples: &[f32], min_lag: usize, max_lag: usize, threshold: f64) -> Option<f64> {
    let window = samples.len() - max_lag - 1;
    let head = &samples[..window];
    let r: Vec<f64> = (0..=max_lag + 1)
        .map(|lag| {
            if lag + 1 < min_lag {
                0.0
            } else {
                normalized_correlation(head, &samples[lag..lag + window])
            }
        })
        .collect();

    let best = (min_lag..=max_lag).map(|lag| r[lag]).fold(f64::MIN, f64::max);
    if best < threshold {
        return None;
    }

    let lag = (min_lag..=max_lag)
        .find(|&lag| {
            lag > min_lag && lag < max_lag && r[lag] >= r[lag - 1] && r[lag] >= r[lag + 1] && r[lag] >= 0.9 * best
        })
        .or_else(|| (min_lag..=max_lag).max_by(|&a, &b| r[a].total_cmp(&r[b])))?;

    let (offset, _) = parabolic_peak(&r, lag);
    Some(lag as f64 + offset)
}

/// One pulse per glottal cycle, found by peak picking around multiples of
/// the autocorrelation period.
pub fn glottal_pulses(
    samples: &[f32],
    sample_rate_hz: u32,
    settings: &PulseSettings,
) -> Result<PulseTrain, DspError> {
    if samples.is_empty() {
        return Err(DspError::Empty);
    }
    ensure_finite(samples, "pulse input")?;

    let global_peak = peak_abs(samples);
    if global_peak == 0.0 {
        return Err(DspError::Silent);
    }

    let sr = f64::from(sample_rate_hz);
    let min_lag = ((sr / settings.ceiling_hz).floor() as usize).max(2);
    let max_lag = (sr / settings.floor_hz).ceil() as usize;
    let needed = 2 * (max_lag + 1);
    if samples.len() < needed {
        return Err(DspError::TooShort { needed });
    }

    let period = period_estimate(samples, min_lag, max_lag, settings.voicing_threshold)
        .ok_or(DspError::Unvoiced)?;

    let (max, min) = samples
        .iter()
        .fold((f32::MIN, f32::MAX), |(hi, lo), &s| (hi.max(s), lo.min(s)));
    let polarity = if max >= -min { 1.0 } else { -1.0 };
    let shaped: Vec<f64> = samples.iter().map(|&s| polarity * f64::from(s)).collect();
    let argmax = |lo: usize, hi: usize| {
        (lo..hi).max_by(|&a, &b| shaped[a].total_cmp(&shaped[b]))
    };

    let first_end = (period.ceil() as usize).min(shaped.len());
    let mut marks = vec![argmax(0, first_end).ok_or(DspError::Unvoiced)?];
    loop {
        let last = marks[marks.len() - 1] as f64;
        let lo = (last + 0.7 * period).floor() as usize;
        let hi = (last + 1.3 * period).ceil() as usize;
        if hi >= shaped.len() {
            break;
        }
        match argmax(lo, hi + 1) {
            Some(next) => marks.push(next),
            None => break,
        }
    }

    let floor = f64::from(settings.silence_threshold * global_peak);
    let mut train = PulseTrain::default();
    for &mark in &marks {
        let (offset, value) = parabolic_peak(&shaped, mark);
        if value.abs() < floor {
            continue;
        }
        train.times_s.push((mark as f64 + offset) / sr);
        train.amplitudes.push(value.abs());
    }

    if train.len() < 3 {
        return Err(DspError::TooFewCycles { found: train.len() });
    }
    Ok(train)
}
