//! Shared numeric building blocks for the analysis stages.
//!
//! Every stage reports through [`Outcome`]: either a measured value or the
//! documented default together with the reason the measurement was skipped.
//! Stages run inside [`isolate`] so a panic in one numeric routine degrades
//! to its default instead of taking the worker down.

pub mod spectrum;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("buffer is empty")]
    Empty,
    #[error("buffer is silent")]
    Silent,
    #[error("no voiced segment found")]
    Unvoiced,
    #[error("buffer shorter than the {needed}-sample analysis span")]
    TooShort { needed: usize },
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
    #[error("signal is numerically degenerate")]
    Degenerate,
    #[error("only {found} of {needed} resonances found")]
    TooFewRoots { found: usize, needed: usize },
    #[error("root finder did not converge after {0} iterations")]
    NoConvergence(usize),
    #[error("only {found} glottal cycles found")]
    TooFewCycles { found: usize },
    #[error("{stage} panicked: {message}")]
    Panicked { stage: &'static str, message: String },
}

/// Result of one analysis stage.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Measured(T),
    Defaulted { value: T, reason: DspError },
}

impl<T> Outcome<T> {
    pub fn from_result(result: Result<T, DspError>, default: impl FnOnce() -> T) -> Self {
        match result {
            Ok(value) => Self::Measured(value),
            Err(reason) => Self::Defaulted {
                value: default(),
                reason,
            },
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Measured(value) | Self::Defaulted { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Measured(value) | Self::Defaulted { value, .. } => value,
        }
    }

    pub fn is_measured(&self) -> bool {
        matches!(self, Self::Measured(_))
    }

    pub fn reason(&self) -> Option<&DspError> {
        match self {
            Self::Measured(_) => None,
            Self::Defaulted { reason, .. } => Some(reason),
        }
    }
}

/// Runs one stage, turning a panic into [`DspError::Panicked`].
pub fn isolate<T>(
    stage: &'static str,
    f: impl FnOnce() -> Result<T, DspError>,
) -> Result<T, DspError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(DspError::Panicked {
            stage,
            message: panic_message(payload.as_ref()),
        }),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

pub fn ensure_finite(samples: &[f32], what: &'static str) -> Result<(), DspError> {
    if samples.iter().all(|s| s.is_finite()) {
        Ok(())
    } else {
        Err(DspError::NonFinite(what))
    }
}

pub fn peak_abs(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

pub fn mean_square(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum::<f64>() / samples.len() as f64
}

/// Median of `values`; averages the two middle elements for even lengths.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Vertex of the parabola through `(i-1, i, i+1)`: `(offset, value)` with the
/// offset in `[-0.5, 0.5]` relative to `i`.
pub fn parabolic_peak(values: &[f64], i: usize) -> (f64, f64) {
    if i == 0 || i + 1 >= values.len() {
        return (0.0, values.get(i).copied().unwrap_or(0.0));
    }
    let (a, b, c) = (values[i - 1], values[i], values[i + 1]);
    let denom = a - 2.0 * b + c;
    if denom == 0.0 || !denom.is_finite() {
        return (0.0, b);
    }
    let offset = (0.5 * (a - c) / denom).clamp(-0.5, 0.5);
    (offset, b - 0.25 * (a - c) * offset)
}

/// Pearson-style normalized cross-correlation of two equal-length windows.
pub fn normalized_correlation(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len().min(b.len());
    let (mut ab, mut aa, mut bb) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a[..n].iter().zip(&b[..n]) {
        let (x, y) = (f64::from(x), f64::from(y));
        ab += x * y;
        aa += x * x;
        bb += y * y;
    }
    let denom = (aa * bb).sqrt();
    if denom > 0.0 {
        ab / denom
    } else {
        0.0
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolate_turns_panics_into_errors() {
        let result: Result<u8, DspError> = isolate("explode", || panic!("boom"));
        assert_eq!(
            result,
            Err(DspError::Panicked {
                stage: "explode",
                message: "boom".to_owned()
            })
        );
    }

    #[test]
    fn outcome_keeps_default_and_reason() {
        let outcome = Outcome::from_result(Err(DspError::Silent), || 7);
        assert_eq!(*outcome.value(), 7);
        assert!(!outcome.is_measured());
        assert_eq!(outcome.reason(), Some(&DspError::Silent));

        let measured = Outcome::from_result(Ok(3), || 7);
        assert_eq!(measured.into_value(), 3);
    }

    #[test]
    fn median_handles_even_and_odd_lengths() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn parabolic_peak_finds_vertex() {
        // y = -(x - 2.25)^2 sampled at 1, 2, 3
        let ys = [-1.5625, -0.0625, -0.5625];
        let (offset, value) = parabolic_peak(&ys, 1);
        assert!((offset - 0.25).abs() < 1e-9);
        assert!(value.abs() < 1e-9);
    }

    #[test]
    fn correlation_of_identical_windows_is_one() {
        let a = test_signals::sine(200.0, 0.5, 512);
        assert!((normalized_correlation(&a, &a) - 1.0).abs() < 1e-9);
        assert_eq!(normalized_correlation(&[0.0; 4], &a[..4]), 0.0);
    }
}
