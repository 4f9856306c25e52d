use crate::dsp::DspError;
use rustfft::num_complex::Complex64;
use std::f64::consts::TAU;

pub const DEFAULT_MAX_ITERATIONS: usize = 500;

const STEP_TOLERANCE: f64 = 1e-12;
const ROUNDING_FACTOR: f64 = 8.0 * f64::EPSILON;

/// Value, derivative and a rounding-error bound of the monic polynomial
/// `coeffs` (highest degree first) at `z`.
fn evaluate(coeffs: &[f64], z: Complex64) -> (Complex64, Complex64, f64) {
    let r = z.norm();
    let mut p = Complex64::new(coeffs[0], 0.0);
    let mut dp = Complex64::new(0.0, 0.0);
    let mut bound = coeffs[0].abs();
    for &c in &coeffs[1..] {
        dp = dp * z + p;
        p = p * z + c;
        bound = bound * r + c.abs();
    }
    (p, dp, bound)
}

/// All complex roots of a real polynomial given highest degree first, found
/// by simultaneous Aberth-Ehrlich iteration.
pub fn polynomial_roots(coeffs: &[f64], max_iterations: usize) -> Result<Vec<Complex64>, DspError> {
    if coeffs.iter().any(|c| !c.is_finite()) {
        return Err(DspError::NonFinite("polynomial coefficients"));
    }
    let lead = coeffs
        .iter()
        .position(|&c| c != 0.0)
        .ok_or(DspError::Degenerate)?;
    let trimmed = &coeffs[lead..];
    let zeros_at_origin = trimmed.iter().rev().take_while(|&&c| c == 0.0).count();
    let poly = &trimmed[..trimmed.len() - zeros_at_origin];

    let mut roots = vec![Complex64::new(0.0, 0.0); zeros_at_origin];
    let degree = poly.len() - 1;
    if degree == 0 {
        return Ok(roots);
    }

    let monic: Vec<f64> = poly.iter().map(|c| c / poly[0]).collect();
    let radius = match monic[degree].abs().powf(1.0 / degree as f64) {
        r if r.is_finite() && r > 0.0 => r,
        _ => 1.0,
    };
    let mut z: Vec<Complex64> = (0..degree)
        .map(|k| Complex64::from_polar(radius, TAU * k as f64 / degree as f64 + 0.4))
        .collect();
    let mut converged = vec![false; degree];

    for _ in 0..max_iterations {
        for k in 0..degree {
            if converged[k] {
                continue;
            }
            let (p, dp, bound) = evaluate(&monic, z[k]);
            if p.norm() <= ROUNDING_FACTOR * bound {
                converged[k] = true;
                continue;
            }
            let ratio = p / dp;
            let repulsion: Complex64 = (0..degree)
                .filter(|&j| j != k)
                .map(|j| (z[k] - z[j]).inv())
                .sum();
            let step = ratio / (Complex64::new(1.0, 0.0) - ratio * repulsion);
            if !step.re.is_finite() || !step.im.is_finite() {
                return Err(DspError::NonFinite("root iteration"));
            }
            z[k] -= step;
            if step.norm() <= STEP_TOLERANCE * (1.0 + z[k].norm()) {
                converged[k] = true;
            }
        }
        if converged.iter().all(|&c| c) {
            roots.extend(z);
            return Ok(roots);
        }
    }

    Err(DspError::NoConvergence(max_iterations))
}
