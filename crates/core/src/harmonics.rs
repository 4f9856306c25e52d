use crate::config::FrameFormat;
use crate::dsp::spectrum::{harmonic_component, time_average, Stft};
use crate::dsp::{isolate, DspError, Outcome};
use serde::{Deserialize, Serialize};

pub const HARMONIC_COUNT: usize = 5;
pub const MEDIAN_KERNEL: usize = 31;

/// One partial of the voice: `ordinal` times the fundamental.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Harmonic {
    #[serde(rename = "freq")]
    pub frequency_hz: f64,
    #[serde(rename = "amp")]
    pub amplitude: f64,
    #[serde(rename = "ratio")]
    pub ordinal: u8,
}

pub type HarmonicSeries = [Harmonic; HARMONIC_COUNT];

/// Idealized 1/k series used when the spectrum cannot be read.
pub fn synthesized_series(pitch_hz: f64) -> HarmonicSeries {
    std::array::from_fn(|i| {
        let k = i + 1;
        Harmonic {
            frequency_hz: pitch_hz * k as f64,
            amplitude: 1.0 / k as f64,
            ordinal: k as u8,
        }
    })
}

/// Reads the first harmonics of a pitch off the harmonic-only spectrum.
pub struct HarmonicExtractor {
    stft: Stft,
    kernel: usize,
}

impl HarmonicExtractor {
    pub fn new(format: &FrameFormat) -> Self {
        Self {
            stft: Stft::new(format.frame_size, format.hop_size()),
            kernel: MEDIAN_KERNEL,
        }
    }

    pub fn extract(
        &self,
        samples: &[f32],
        pitch_hz: f64,
        sample_rate_hz: u32,
    ) -> Outcome<HarmonicSeries> {
        let result = isolate("harmonics", || self.measure(samples, pitch_hz, sample_rate_hz));
        Outcome::from_result(result, || synthesized_series(pitch_hz))
    }

    fn measure(
        &self,
        samples: &[f32],
        pitch_hz: f64,
        sample_rate_hz: u32,
    ) -> Result<HarmonicSeries, DspError> {
        if !pitch_hz.is_finite() {
            return Err(DspError::NonFinite("pitch"));
        }
        if pitch_hz <= 0.0 {
            return Err(DspError::Unvoiced);
        }

        let spectrogram = self.stft.magnitudes(samples)?;
        let spectrum = time_average(&harmonic_component(&spectrogram, self.kernel));
        let last_bin = spectrum.len().checked_sub(1).ok_or(DspError::Empty)?;
        let bin_hz = f64::from(sample_rate_hz) / self.stft.n_fft() as f64;

        let series: HarmonicSeries = std::array::from_fn(|i| {
            let k = i + 1;
            let target = pitch_hz * k as f64;
            let bin = ((target / bin_hz).round() as usize).min(last_bin);
            Harmonic {
                frequency_hz: target,
                amplitude: f64::from(spectrum[bin]),
                ordinal: k as u8,
            }
        });

        if series.iter().any(|h| !h.amplitude.is_finite()) {
            return Err(DspError::NonFinite("harmonic amplitude"));
        }
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_signals::{voiced, FRAME, SR};

    fn extractor() -> HarmonicExtractor {
        HarmonicExtractor::new(&FrameFormat::default())
    }

    #[test]
    fn measured_series_sits_on_integer_multiples() {
        let out = extractor().extract(&voiced(200.0, 0.5, FRAME), 200.0, SR);
        assert!(out.is_measured());
        let series = out.value();
        for (i, h) in series.iter().enumerate() {
            assert_eq!(h.ordinal as usize, i + 1);
            assert!((h.frequency_hz - 200.0 * (i + 1) as f64).abs() < 1e-9);
            assert!(h.amplitude >= 0.0);
        }
        assert!(series[0].amplitude > series[4].amplitude);
    }

    #[test]
    fn zero_pitch_falls_back_to_synthesized_series() {
        let out = extractor().extract(&[0.0; FRAME], 0.0, SR);
        assert_eq!(out.reason(), Some(&DspError::Unvoiced));
        assert_eq!(*out.value(), synthesized_series(0.0));
    }

    #[test]
    fn synthesized_series_uses_reciprocal_amplitudes() {
        let series = synthesized_series(100.0);
        assert_eq!(series.len(), HARMONIC_COUNT);
        assert_eq!(series[2].frequency_hz, 300.0);
        assert!((series[3].amplitude - 0.25).abs() < 1e-12);
    }

    #[test]
    fn harmonics_serialize_with_wire_names() {
        let json = serde_json::to_value(synthesized_series(100.0)[0]).expect("json");
        assert_eq!(json, serde_json::json!({"freq": 100.0, "amp": 1.0, "ratio": 1}));
    }
}
