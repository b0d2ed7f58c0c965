//! Synthetic CV and DPV curves

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use crate::config::SimulatorConfig;
use crate::protocol::DataPoint;
use crate::technique::{Technique, TechniqueParameters};

const CV_WINDOW_S: f64 = 20.0;
const CV_HALF_PERIOD_S: f64 = 10.0;
const CV_RATE_HZ: f64 = 16.0;

const DPV_WINDOW_S: f64 = 5.0;
const DPV_RATE_HZ: f64 = 50.0;
const DPV_PEAK_WIDTH_V: f64 = 0.2;
const DPV_PEAK_HEIGHT_UA: f64 = 2.0;

/// Half-width of the uniform noise added to every current sample (µA)
pub const NOISE_AMPLITUDE_UA: f64 = 0.05;

/// Fixed-step sample generator for one simulated scan.
///
/// Sample `i` sits at `t = i / rate` on the simulated clock, so the number of
/// samples is fixed per technique and independent of wall-clock pacing.
#[derive(Debug, Clone)]
pub struct Waveform {
    technique: Technique,
    start_v: f64,
    end_v: f64,
    peak_center_v: f64,
    rng: StdRng,
    index: usize,
}

impl Waveform {
    /// Generator for `params`, seeded from `config`
    pub fn new(params: &TechniqueParameters, config: &SimulatorConfig) -> Self {
        Self {
            technique: params.technique(),
            start_v: params.start_v(),
            end_v: params.end_v(),
            peak_center_v: config.peak_center_v,
            rng: StdRng::seed_from_u64(config.seed),
            index: 0,
        }
    }

    /// Samples per simulated second
    pub fn sample_rate_hz(&self) -> f64 {
        match self.technique {
            Technique::Cv => CV_RATE_HZ,
            Technique::Dpv => DPV_RATE_HZ,
        }
    }

    /// Length of the simulated acquisition window
    pub fn window(&self) -> Duration {
        match self.technique {
            Technique::Cv => Duration::from_secs_f64(CV_WINDOW_S),
            Technique::Dpv => Duration::from_secs_f64(DPV_WINDOW_S),
        }
    }

    /// Simulated time between samples
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sample_rate_hz())
    }

    /// Total number of samples in the window
    pub fn sample_count(&self) -> usize {
        (self.window().as_secs_f64() * self.sample_rate_hz()).round() as usize
    }

    fn potential_at(&self, t: f64) -> f64 {
        let span = self.end_v - self.start_v;
        match self.technique {
            Technique::Cv => {
                // triangle: start -> end over one half-period, then back
                let phase = (t / CV_HALF_PERIOD_S) % 2.0;
                if phase <= 1.0 {
                    self.start_v + span * phase
                } else {
                    self.end_v - span * (phase - 1.0)
                }
            }
            Technique::Dpv => self.start_v + span * (t / DPV_WINDOW_S),
        }
    }

    fn clean_current(&self, voltage: f64) -> f64 {
        match self.technique {
            Technique::Cv => 2.0 + 0.5 * voltage.powi(2) + (voltage - 0.2).abs(),
            Technique::Dpv => {
                let offset = voltage - self.peak_center_v;
                DPV_PEAK_HEIGHT_UA * (-(offset * offset) / (2.0 * DPV_PEAK_WIDTH_V.powi(2))).exp()
            }
        }
    }
}

impl Iterator for Waveform {
    type Item = DataPoint;

    fn next(&mut self) -> Option<DataPoint> {
        if self.index >= self.sample_count() {
            return None;
        }
        let t = self.index as f64 / self.sample_rate_hz();
        self.index += 1;

        let voltage = self.potential_at(t);
        let noise = self.rng.gen_range(-NOISE_AMPLITUDE_UA..NOISE_AMPLITUDE_UA);
        Some(DataPoint::new(voltage, self.clean_current(voltage) + noise))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.sample_count().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Waveform {}
