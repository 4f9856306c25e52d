use crate::dsp::DspError;

/// First-order high-pass `y[n] = x[n] - coefficient * x[n-1]`.
pub fn preemphasis(samples: &[f32], coefficient: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(samples.len());
    let mut previous = samples.first().map(|&s| f64::from(s)).unwrap_or(0.0);
    for (n, &s) in samples.iter().enumerate() {
        let x = f64::from(s);
        out.push(if n == 0 { x } else { x - coefficient * previous });
        previous = x;
    }
    out
}

/// Linear prediction coefficients by Burg's method.
///
/// Returns `[1, a1, .., a_order]` such that the prediction error filter is
/// `A(z) = 1 + a1 z^-1 + .. + a_order z^-order`.
pub fn burg(signal: &[f64], order: usize) -> Result<Vec<f64>, DspError> {
    if signal.is_empty() {
        return Err(DspError::Empty);
    }
    if signal.len() <= order {
        return Err(DspError::TooShort { needed: order + 1 });
    }
    if signal.iter().any(|x| !x.is_finite()) {
        return Err(DspError::NonFinite("lpc input"));
    }

    let n = signal.len();
    let mut a = vec![0.0f64; order + 1];
    a[0] = 1.0;
    let mut previous = a.clone();
    let mut forward = signal.to_vec();
    let mut backward = signal.to_vec();

    for m in 0..order {
        let (mut num, mut den) = (0.0f64, 0.0f64);
        for i in (m + 1)..n {
            num += forward[i] * backward[i - 1];
            den += forward[i] * forward[i] + backward[i - 1] * backward[i - 1];
        }
        if !(den > f64::MIN_POSITIVE) {
            return Err(DspError::Degenerate);
        }
        let k = -2.0 * num / den;

        previous.copy_from_slice(&a);
        for i in 1..=m + 1 {
            a[i] = previous[i] + k * previous[m + 1 - i];
        }

        for i in ((m + 1)..n).rev() {
            let f = forward[i];
            forward[i] = f + k * backward[i - 1];
            backward[i] = backward[i - 1] + k * f;
        }
    }

    if a.iter().any(|c| !c.is_finite()) {
        return Err(DspError::NonFinite("lpc coefficients"));
    }
    Ok(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preemphasis_differences_neighbours() {
        let out = preemphasis(&[1.0, 1.0, 0.0], 0.97);
        assert_eq!(out[0], 1.0);
        assert!((out[1] - 0.03).abs() < 1e-6);
        assert!((out[2] + 0.97).abs() < 1e-6);
    }

    #[test]
    fn burg_recovers_an_ar1_process() {
        // x[n] = 0.9 x[n-1] + e[n] with a deterministic excitation.
        let mut x = vec![0.0f64; 4000];
        let mut state = 12345u64;
        for n in 1..x.len() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let e = ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5;
            x[n] = 0.9 * x[n - 1] + e;
        }
        let a = burg(&x, 1).expect("coefficients");
        assert_eq!(a[0], 1.0);
        assert!((a[1] + 0.9).abs() < 0.05, "{a:?}");
    }

    #[test]
    fn silence_is_degenerate() {
        assert_eq!(burg(&[0.0; 64], 4), Err(DspError::Degenerate));
    }

    #[test]
    fn order_must_fit_the_signal() {
        assert_eq!(burg(&[1.0; 4], 4), Err(DspError::TooShort { needed: 5 }));
    }
}
