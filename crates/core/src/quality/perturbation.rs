use super::pulses::PulseTrain;
use crate::dsp::DspError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerturbationSettings {
    pub shortest_period_s: f64,
    pub longest_period_s: f64,
    pub max_period_factor: f64,
    pub max_amplitude_factor: f64,
}

impl Default for PerturbationSettings {
    fn default() -> Self {
        Self {
            shortest_period_s: 0.0001,
            longest_period_s: 0.02,
            max_period_factor: 1.3,
            max_amplitude_factor: 1.6,
        }
    }
}

impl PerturbationSettings {
    pub fn is_valid_period(&self, period_s: f64) -> bool {
        period_s >= self.shortest_period_s && period_s <= self.longest_period_s
    }
}

fn ratio(a: f64, b: f64) -> f64 {
    a.max(b) / a.min(b)
}

/// Local jitter in percent.
pub fn jitter_local(train: &PulseTrain, settings: &PerturbationSettings) -> Result<f64, DspError> {
    let periods: Vec<f64> = train.periods().collect();

    let (mut diff_sum, mut pairs) = (0.0f64, 0usize);
    for w in periods.windows(2) {
        let (a, b) = (w[0], w[1]);
        if settings.is_valid_period(a)
            && settings.is_valid_period(b)
            && ratio(a, b) <= settings.max_period_factor
        {
            diff_sum += (b - a).abs();
            pairs += 1;
        }
    }

    let valid: Vec<f64> = periods
        .iter()
        .copied()
        .filter(|&p| settings.is_valid_period(p))
        .collect();
    if pairs == 0 || valid.is_empty() {
        return Err(DspError::TooFewCycles { found: train.len() });
    }

    let mean_period = valid.iter().sum::<f64>() / valid.len() as f64;
    Ok(100.0 * (diff_sum / pairs as f64) / mean_period)
}

/// Local shimmer in percent.
pub fn shimmer_local(train: &PulseTrain, settings: &PerturbationSettings) -> Result<f64, DspError> {
    let (mut diff_sum, mut pairs) = (0.0f64, 0usize);

    for i in 1..train.len() {
        let period = train.times_s[i] - train.times_s[i - 1];
        let (a, b) = (train.amplitudes[i - 1], train.amplitudes[i]);
        if settings.is_valid_period(period)
            && a > 0.0
            && b > 0.0
            && ratio(a, b) <= settings.max_amplitude_factor
        {
            diff_sum += (b - a).abs();
            pairs += 1;
        }
    }

    let amplitudes: Vec<f64> = train.amplitudes.iter().copied().filter(|&a| a > 0.0).collect();
    if pairs == 0 || amplitudes.is_empty() {
        return Err(DspError::TooFewCycles { found: train.len() });
    }
    let mean_amplitude = amplitudes.iter().sum::<f64>() / amplitudes.len() as f64;
    Ok(100.0 * (diff_sum / pairs as f64) / mean_amplitude)
}
