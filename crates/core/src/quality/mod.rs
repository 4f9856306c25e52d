//! Voice quality: harmonics-to-noise ratio, cycle-to-cycle perturbation and a
//! text report. Each measure defaults on its own so one failure never blanks
//! the others.

mod hnr;
mod perturbation;
mod pulses;
mod report;

pub use hnr::{harmonicity_cc, HnrSettings};
pub use perturbation::{jitter_local, shimmer_local, PerturbationSettings};
pub use pulses::{glottal_pulses, PulseSettings, PulseTrain};
pub use report::voice_report;

use crate::dsp::{isolate, DspError, Outcome};

#[derive(Clone, Debug, PartialEq)]
pub struct VoiceQuality {
    pub hnr: Outcome<f64>,
    pub jitter: Outcome<f64>,
    pub shimmer: Outcome<f64>,
    pub report: Outcome<String>,
}

#[derive(Clone, Debug, Default)]
pub struct VoiceQualityAnalyzer {
    hnr: HnrSettings,
    pulses: PulseSettings,
    perturbation: PerturbationSettings,
}

impl VoiceQualityAnalyzer {
    pub fn analyze(&self, samples: &[f32], sample_rate_hz: u32) -> VoiceQuality {
        let hnr = Outcome::from_result(
            isolate("hnr", || harmonicity_cc(samples, sample_rate_hz, &self.hnr)),
            || 0.0,
        );

        let train: Result<PulseTrain, DspError> =
            isolate("pulses", || glottal_pulses(samples, sample_rate_hz, &self.pulses));

        type Measure = fn(&PulseTrain, &PerturbationSettings) -> Result<f64, DspError>;
        let with_train = |stage: &'static str, f: Measure| {
            let result = match &train {
                Ok(t) => isolate(stage, || f(t, &self.perturbation)),
                Err(e) => Err(e.clone()),
            };
            Outcome::from_result(result, || 0.0)
        };
        let jitter = with_train("jitter", jitter_local);
        let shimmer = with_train("shimmer", shimmer_local);

        let report = Outcome::from_result(
            match &train {
                Ok(t) => isolate("report", || {
                    voice_report(t, &hnr, &jitter, &shimmer, &self.perturbation)
                }),
                Err(e) => Err(e.clone()),
            },
            String::new,
        );

        VoiceQuality {
            hnr,
            jitter,
            shimmer,
            report,
        }
    }
}
