//! Vocal-tract resonances from the roots of an LPC polynomial.

mod lpc;
mod roots;

pub use lpc::{burg, preemphasis};
pub use roots::{polynomial_roots, DEFAULT_MAX_ITERATIONS};

use crate::dsp::{ensure_finite, isolate, DspError, Outcome};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

pub const FORMANT_COUNT: usize = 3;
pub const PREEMPHASIS: f64 = 0.97;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Formant {
    #[serde(rename = "freq")]
    pub frequency_hz: f64,
    #[serde(rename = "bw")]
    pub bandwidth_hz: f64,
}

/// F1..F3 in ascending frequency.
pub type FormantSet = [Formant; FORMANT_COUNT];

pub const DEFAULT_FORMANTS: FormantSet = [
    Formant {
        frequency_hz: 500.0,
        bandwidth_hz: 50.0,
    },
    Formant {
        frequency_hz: 1500.0,
        bandwidth_hz: 100.0,
    },
    Formant {
        frequency_hz: 2500.0,
        bandwidth_hz: 150.0,
    },
];

/// LPC order for a sample rate: two poles per kHz plus two.
pub fn lpc_order(sample_rate_hz: u32) -> usize {
    2 + (sample_rate_hz / 1000) as usize
}

#[derive(Clone, Debug)]
pub struct FormantEstimator {
    preemphasis: f64,
    max_root_iterations: usize,
}

impl Default for FormantEstimator {
    fn default() -> Self {
        Self {
            preemphasis: PREEMPHASIS,
            max_root_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl FormantEstimator {
    pub fn with_max_root_iterations(mut self, max_root_iterations: usize) -> Self {
        self.max_root_iterations = max_root_iterations;
        self
    }

    pub fn estimate(&self, samples: &[f32], sample_rate_hz: u32) -> Outcome<FormantSet> {
        let result = isolate("formants", || self.measure(samples, sample_rate_hz));
        Outcome::from_result(result, || DEFAULT_FORMANTS)
    }

    fn measure(&self, samples: &[f32], sample_rate_hz: u32) -> Result<FormantSet, DspError> {
        if samples.is_empty() {
            return Err(DspError::Empty);
        }
        ensure_finite(samples, "formant input")?;

        let emphasized = preemphasis(samples, self.preemphasis);
        let coefficients = burg(&emphasized, lpc_order(sample_rate_hz))?;
        let roots = polynomial_roots(&coefficients, self.max_root_iterations)?;

        let sr = f64::from(sample_rate_hz);
        let mut resonances: Vec<Formant> = roots
            .iter()
            .filter(|r| r.im >= 0.0)
            .map(|r| Formant {
                frequency_hz: r.im.atan2(r.re) * sr / TAU,
                bandwidth_hz: -0.5 * (sr / PI) * r.norm().ln(),
            })
            .filter(|f| f.frequency_hz > 0.0)
            .collect();

        if resonances
            .iter()
            .any(|f| !f.frequency_hz.is_finite() || !f.bandwidth_hz.is_finite())
        {
            return Err(DspError::NonFinite("formant"));
        }
        resonances.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));

        match resonances.as_slice() {
            [f1, f2, f3, ..] => Ok([*f1, *f2, *f3]),
            found => Err(DspError::TooFewRoots {
                found: found.len(),
                needed: FORMANT_COUNT,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_signals::{mix, noise, voiced, FRAME, SR};

    fn vowel_like() -> Vec<f32> {
        mix(&voiced(120.0, 0.5, FRAME), &noise(5, 0.01, FRAME))
    }

    #[test]
    fn order_scales_with_sample_rate() {
        assert_eq!(lpc_order(44_100), 46);
        assert_eq!(lpc_order(16_000), 18);
    }

    #[test]
    fn voiced_frame_yields_three_ascending_resonances() {
        let out = FormantEstimator::default().estimate(&vowel_like(), SR);
        assert!(out.is_measured(), "{:?}", out.reason());
        let set = out.value();
        assert!(set[0].frequency_hz > 0.0);
        assert!(set.windows(2).all(|w| w[0].frequency_hz <= w[1].frequency_hz));
        assert!(set.iter().all(|f| f.frequency_hz < f64::from(SR) / 2.0 + 1.0));
    }

    #[test]
    fn silence_uses_default_triple() {
        let out = FormantEstimator::default().estimate(&[0.0; FRAME], SR);
        assert_eq!(out.reason(), Some(&DspError::Degenerate));
        assert_eq!(*out.value(), DEFAULT_FORMANTS);
    }

    #[test]
    fn root_finder_failure_uses_default_triple() {
        let out = FormantEstimator::default()
            .with_max_root_iterations(0)
            .estimate(&vowel_like(), SR);
        assert_eq!(out.reason(), Some(&DspError::NoConvergence(0)));
        assert_eq!(*out.value(), DEFAULT_FORMANTS);
    }

    #[test]
    fn non_finite_input_uses_default_triple() {
        let mut samples = vowel_like();
        samples[100] = f32::NAN;
        let out = FormantEstimator::default().estimate(&samples, SR);
        assert_eq!(*out.value(), DEFAULT_FORMANTS);
        assert!(!out.is_measured());
    }

    #[test]
    fn formants_serialize_with_wire_names() {
        let json = serde_json::to_value(DEFAULT_FORMANTS).expect("json");
        assert_eq!(json[1], serde_json::json!({"freq": 1500.0, "bw": 100.0}));
    }
}
