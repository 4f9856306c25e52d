use super::{ensure_finite, DspError};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Magnitude spectrogram laid out as `frames[time][bin]`.
pub type Spectrogram = Vec<Vec<f32>>;

/// Periodic Hann window.
pub fn hann(len: usize) -> Vec<f32> {
    (0..len)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / len as f32).cos())
        .collect()
}

/// Centered short-time Fourier transform: the input is zero padded by half a
/// window on each side so frame `t` is centered on sample `t * hop`.
pub struct Stft {
    n_fft: usize,
    hop: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl Stft {
    pub fn new(n_fft: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            n_fft,
            hop: hop.max(1),
            window: hann(n_fft),
            fft: planner.plan_fft_forward(n_fft),
        }
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn magnitudes(&self, samples: &[f32]) -> Result<Spectrogram, DspError> {
        if samples.is_empty() {
            return Err(DspError::Empty);
        }
        ensure_finite(samples, "stft input")?;

        let pad = self.n_fft / 2;
        let mut padded = vec![0.0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let frames = 1 + (padded.len() - self.n_fft) / self.hop;
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.n_fft];
        let mut out = Vec::with_capacity(frames);

        for t in 0..frames {
            let start = t * self.hop;
            for (slot, (&x, &w)) in buffer
                .iter_mut()
                .zip(padded[start..start + self.n_fft].iter().zip(&self.window))
            {
                *slot = Complex::new(x * w, 0.0);
            }
            self.fft.process(&mut buffer);
            out.push(buffer[..self.bins()].iter().map(|c| c.norm()).collect());
        }

        Ok(out)
    }
}

fn reflect(index: isize, len: usize) -> usize {
    let n = len as isize;
    let period = 2 * n;
    let m = index.rem_euclid(period);
    if m < n {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

fn median_of(window: &mut [f32]) -> f32 {
    let mid = window.len() / 2;
    let (_, m, _) = window.select_nth_unstable_by(mid, f32::total_cmp);
    *m
}

/// Keeps the harmonic (time-stable) part of a spectrogram using median
/// filtering along time against median filtering along frequency, combined
/// through a squared soft mask.
pub fn harmonic_component(spec: &Spectrogram, kernel: usize) -> Spectrogram {
    let frames = spec.len();
    if frames == 0 {
        return Vec::new();
    }
    let bins = spec[0].len();
    let half = (kernel / 2) as isize;
    let mut scratch = vec![0.0f32; 2 * half as usize + 1];

    let mut out = vec![vec![0.0f32; bins]; frames];
    for t in 0..frames {
        for f in 0..bins {
            for (k, slot) in scratch.iter_mut().enumerate() {
                let tt = reflect(t as isize + k as isize - half, frames);
                *slot = spec[tt][f];
            }
            let harmonic = median_of(&mut scratch);

            for (k, slot) in scratch.iter_mut().enumerate() {
                let ff = reflect(f as isize + k as isize - half, bins);
                *slot = spec[t][ff];
            }
            let percussive = median_of(&mut scratch);

            let h2 = harmonic * harmonic;
            let denom = h2 + percussive * percussive;
            let mask = if denom > 0.0 { h2 / denom } else { 0.0 };
            out[t][f] = spec[t][f] * mask;
        }
    }
    out
}

/// Mean magnitude per bin across all frames.
pub fn time_average(spec: &Spectrogram) -> Vec<f32> {
    let Some(first) = spec.first() else {
        return Vec::new();
    };
    let mut acc = vec![0.0f32; first.len()];
    for frame in spec {
        for (a, v) in acc.iter_mut().zip(frame) {
            *a += v;
        }
    }
    let n = spec.len() as f32;
    acc.iter_mut().for_each(|a| *a /= n);
    acc
}
