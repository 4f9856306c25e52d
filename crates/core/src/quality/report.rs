use super::perturbation::PerturbationSettings;
use super::pulses::PulseTrain;
use crate::dsp::{median, DspError, Outcome};

const UNDEFINED: &str = "--undefined--";

fn measured(outcome: &Outcome<f64>, unit: &str, precision: usize) -> String {
    match outcome {
        Outcome::Measured(v) => format!("{v:.precision$}{unit}"),
        Outcome::Defaulted { .. } => UNDEFINED.to_owned(),
    }
}

fn mean_and_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// Multi-line plain-text voice summary in the layout of a Praat voice report.
pub fn voice_report(
    train: &PulseTrain,
    hnr: &Outcome<f64>,
    jitter: &Outcome<f64>,
    shimmer: &Outcome<f64>,
    settings: &PerturbationSettings,
) -> Result<String, DspError> {
    let periods: Vec<f64> = train
        .periods()
        .filter(|&p| settings.is_valid_period(p))
        .collect();
    if periods.is_empty() {
        return Err(DspError::TooFewCycles { found: train.len() });
    }

    let mut pitches: Vec<f64> = periods.iter().map(|p| 1.0 / p).collect();
    let (mean_pitch, sd_pitch) = mean_and_sd(&pitches);
    let min_pitch = pitches.iter().copied().fold(f64::MAX, f64::min);
    let max_pitch = pitches.iter().copied().fold(f64::MIN, f64::max);
    let median_pitch = median(&mut pitches).ok_or(DspError::TooFewCycles { found: 0 })?;
    let (mean_period, sd_period) = mean_and_sd(&periods);

    let lines = [
        "Pitch:".to_owned(),
        format!("   Median pitch: {median_pitch:.3} Hz"),
        format!("   Mean pitch: {mean_pitch:.3} Hz"),
        format!("   Standard deviation: {sd_pitch:.3} Hz"),
        format!("   Minimum pitch: {min_pitch:.3} Hz"),
        format!("   Maximum pitch: {max_pitch:.3} Hz"),
        "Pulses:".to_owned(),
        format!("   Number of pulses: {}", train.len()),
        format!("   Number of periods: {}", periods.len()),
        format!("   Mean period: {mean_period:.6E} seconds"),
        format!("   Standard deviation of period: {sd_period:.6E} seconds"),
        "Jitter:".to_owned(),
        format!("   Jitter (local): {}", measured(jitter, "%", 3)),
        "Shimmer:".to_owned(),
        format!("   Shimmer (local): {}", measured(shimmer, "%", 3)),
        "Harmonicity of the voiced parts only:".to_owned(),
        format!("   Mean harmonics-to-noise ratio: {}", measured(hnr, " dB", 3)),
    ];
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn train() -> PulseTrain {
        PulseTrain {
            times_s: vec![0.0, 0.005, 0.010, 0.015],
            amplitudes: vec![0.5; 4],
        }
    }

    #[test]
    fn report_lists_pitch_and_measures() {
        let report = voice_report(
            &train(),
            &Outcome::Measured(21.5),
            &Outcome::Measured(0.25),
            &Outcome::Measured(1.5),
            &PerturbationSettings::default(),
        )
        .expect("report");

        assert!(report.contains("Median pitch: 200.000 Hz"), "{report}");
        assert!(report.contains("Number of pulses: 4"));
        assert!(report.contains("Number of periods: 3"));
        assert!(report.contains("Jitter (local): 0.250%"));
        assert!(report.contains("Mean harmonics-to-noise ratio: 21.500 dB"));
    }

    #[test]
    fn failed_measures_print_undefined() {
        let failed = Outcome::Defaulted {
            value: 0.0,
            reason: DspError::Unvoiced,
        };
        let report = voice_report(
            &train(),
            &failed,
            &failed,
            &Outcome::Measured(2.0),
            &PerturbationSettings::default(),
        )
        .expect("report");

        assert!(report.contains("Jitter (local): --undefined--"));
        assert!(report.contains("Mean harmonics-to-noise ratio: --undefined--"));
        assert!(report.contains("Shimmer (local): 2.000%"));
    }

    #[test]
    fn empty_train_has_no_report() {
        let err = voice_report(
            &PulseTrain::default(),
            &Outcome::Measured(0.0),
            &Outcome::Measured(0.0),
            &Outcome::Measured(0.0),
            &PerturbationSettings::default(),
        )
        .unwrap_err();
        assert_eq!(err, DspError::TooFewCycles { found: 0 });
    }
}
