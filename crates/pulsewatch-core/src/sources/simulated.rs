//! Synthetic pulse generator.
//!
//! Produces a sinusoidal pulse on all three positions with a shared noise
//! term. Simulated time alternates between a normal and an abnormal regime
//! every 30 seconds:
//!
//! | | normal | abnormal |
//! |---|---|---|
//! | base frequency | 1.2 Hz | 2.0 Hz |
//! | cun / guan / chi gain | 1.0 / 0.8 / 0.6 | 1.8 / 1.5 / 1.2 |
//! | noise σ | 0.1 | 0.3 |
//! | pulse rate | 72 | 120 |
//!
//! Phase offsets are 0, 0.2, and 0.4 rad for cun, guan, chi.

use std::f64::consts::PI;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::PipelineConfig;
use crate::error::SourceError;
use crate::sample::{Regime, SampleSource};
use crate::source::{DataSource, RawRecord, SourcePoll};

/// Length of each regime in simulated seconds.
pub const REGIME_PERIOD_SECS: f64 = 30.0;

const PHASES: [f64; 3] = [0.0, 0.2, 0.4];
const NORMAL_GAINS: [f64; 3] = [1.0, 0.8, 0.6];
const ABNORMAL_GAINS: [f64; 3] = [1.8, 1.5, 1.2];

/// Regime in effect at simulated time `t`.
pub fn regime_at(t: f64) -> Regime {
    if ((t / REGIME_PERIOD_SECS).floor() as i64).rem_euclid(2) == 1 {
        Regime::Abnormal
    } else {
        Regime::Normal
    }
}

/// Noise standard deviation for a regime.
pub fn noise_sigma(regime: Regime) -> f64 {
    match regime {
        Regime::Normal => 0.1,
        Regime::Abnormal => 0.3,
    }
}

/// Noise-free model output plus the given noise, at simulated time `t`.
pub fn synthesize(t: f64, noise: f64) -> (Regime, [f64; 3], f64) {
    let regime = regime_at(t);
    let (freq, gains, pulse_rate) = match regime {
        Regime::Normal => (1.2, NORMAL_GAINS, 72.0),
        Regime::Abnormal => (2.0, ABNORMAL_GAINS, 120.0),
    };
    let angle = 2.0 * PI * freq * t;
    let values = std::array::from_fn(|i| gains[i] * (angle + PHASES[i]).sin() + noise);
    (regime, values, pulse_rate)
}

/// Simulated source. Never exhausts.
pub struct SimulatedSource {
    step: f64,
    ticks: u64,
    interval: Duration,
    rng: StdRng,
}

impl SimulatedSource {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Reproducible noise sequence for tests and headless runs.
    pub fn with_seed(config: &PipelineConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &PipelineConfig, rng: StdRng) -> Self {
        Self {
            step: config.simulation_step_secs,
            ticks: 0,
            interval: config.simulation_interval(),
            rng,
        }
    }

    /// Simulated time of the next record.
    pub fn elapsed(&self) -> f64 {
        // Derived from the tick count so long runs do not accumulate drift.
        self.ticks as f64 * self.step
    }

    /// One draw from N(0, 1) via Box-Muller.
    fn standard_normal(&mut self) -> f64 {
        let u1: f64 = self.rng.random::<f64>().max(1e-12);
        let u2: f64 = self.rng.random::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// Produce the next record.
    pub fn next_record(&mut self) -> RawRecord {
        let t = self.elapsed();
        let noise = self.standard_normal() * noise_sigma(regime_at(t));
        let (regime, values, pulse_rate) = synthesize(t, noise);
        self.ticks += 1;
        RawRecord {
            timestamp: t,
            values,
            pulse_rate: Some(pulse_rate),
            source: SampleSource::Simulation,
            status: Some(regime),
        }
    }
}

impl DataSource for SimulatedSource {
    fn describe(&self) -> String {
        format!("simulator (t={:.1}s)", self.elapsed())
    }

    fn poll_record(&mut self) -> Result<SourcePoll, SourceError> {
        Ok(SourcePoll::Record(self.next_record()))
    }

    fn cadence(&self) -> Duration {
        self.interval
    }
}
