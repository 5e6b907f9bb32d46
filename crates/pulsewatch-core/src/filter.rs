//! Notch filter engine.
//!
//! A second-order IIR band-reject filter with the same coefficient design as
//! the classic `iirnotch` recipe, applied zero-phase (forward then backward)
//! over a short window. Only the last output sample is kept, so each call
//! smooths the newest raw value against the channel's recent history.
//!
//! # Window policy
//!
//! ```text
//! history >= MIN_HISTORY ──▶ last WINDOW_LEN-1 values ++ newest ──▶ filtfilt ──▶ last
//! history <  MIN_HISTORY ──▶ newest unchanged
//! ```
//!
//! The filter carries no state between calls.

use std::f64::consts::PI;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};

/// Samples filtered per call (prior values plus the newest one).
pub const WINDOW_LEN: usize = 10;

/// Prior values required before filtering kicks in. Below this the raw value
/// passes through.
pub const MIN_HISTORY: usize = 10;

/// Edge padding used by the forward-backward pass: three times the filter length.
const PAD_LEN: usize = 9;

/// Fixed-parameter notch filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotchFilter {
    b: [f64; 3],
    a: [f64; 3],
    /// Steady-state initial conditions for a unit step.
    zi: [f64; 2],
}

impl NotchFilter {
    /// Design a notch at `notch_hz` with quality `quality` for data sampled at
    /// `sampling_rate` Hz.
    pub fn new(notch_hz: f64, quality: f64, sampling_rate: f64) -> Result<Self> {
        if !(notch_hz.is_finite() && quality.is_finite() && sampling_rate.is_finite()) {
            return Err(Error::InvalidInput("filter parameters must be finite".into()));
        }
        if notch_hz <= 0.0 || quality <= 0.0 || sampling_rate <= 0.0 {
            return Err(Error::InvalidInput("filter parameters must be positive".into()));
        }
        let nyquist = sampling_rate / 2.0;
        if notch_hz >= nyquist {
            return Err(Error::InvalidInput(format!(
                "notch {notch_hz} Hz must be below Nyquist ({nyquist} Hz)"
            )));
        }

        let w0 = notch_hz / nyquist * PI;
        let bandwidth = notch_hz / nyquist / quality * PI;
        // -3 dB attenuation at the band edges.
        let beta = (bandwidth / 2.0).tan();
        let gain = 1.0 / (1.0 + beta);
        let cos_w0 = w0.cos();

        let b = [gain, -2.0 * gain * cos_w0, gain];
        let a = [1.0, -2.0 * gain * cos_w0, 2.0 * gain - 1.0];

        let b_rest = [b[1] - a[1] * b[0], b[2] - a[2] * b[0]];
        let z0 = (b_rest[0] + b_rest[1]) / (1.0 + a[1] + a[2]);
        let z1 = b_rest[1] - a[2] * z0;

        Ok(Self { b, a, zi: [z0, z1] })
    }

    /// Build the filter described by a pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(
            config.notch_frequency,
            config.quality_factor,
            config.sampling_rate,
        )
    }

    /// Numerator coefficients.
    pub fn numerator(&self) -> [f64; 3] {
        self.b
    }

    /// Denominator coefficients, normalized so `a[0] == 1`.
    pub fn denominator(&self) -> [f64; 3] {
        self.a
    }

    /// Filter `newest` against the channel's prior values (oldest first).
    ///
    /// Returns `newest` unchanged when fewer than [`MIN_HISTORY`] prior values
    /// are available. Fails with [`Error::InvalidInput`] on non-finite input.
    pub fn apply(&self, history: &[f64], newest: f64) -> Result<f64> {
        if !newest.is_finite() {
            return Err(Error::InvalidInput(format!("newest value {newest} is not finite")));
        }
        if let Some(bad) = history.iter().find(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(format!("history contains {bad}")));
        }
        if history.len() < MIN_HISTORY {
            return Ok(newest);
        }

        let mut window = Vec::with_capacity(WINDOW_LEN);
        window.extend_from_slice(&history[history.len() - (WINDOW_LEN - 1)..]);
        window.push(newest);

        let filtered = self.filtfilt(&window)?;
        filtered
            .last()
            .copied()
            .ok_or_else(|| Error::InvalidInput("empty filter output".into()))
    }

    /// Zero-phase filtering with odd reflection padding at both ends.
    pub fn filtfilt(&self, x: &[f64]) -> Result<Vec<f64>> {
        let n = x.len();
        if n <= PAD_LEN {
            return Err(Error::InvalidInput(format!(
                "window of {n} samples is too short, need more than {PAD_LEN}"
            )));
        }

        let first = x[0];
        let last = x[n - 1];
        let mut ext = Vec::with_capacity(n + 2 * PAD_LEN);
        ext.extend((1..=PAD_LEN).rev().map(|i| 2.0 * first - x[i]));
        ext.extend_from_slice(x);
        ext.extend((2..=PAD_LEN + 1).map(|i| 2.0 * last - x[n - i]));

        let mut forward = self.lfilter(&ext, ext[0]);
        forward.reverse();
        let seed = forward[0];
        let mut backward = self.lfilter(&forward, seed);
        backward.reverse();

        Ok(backward[PAD_LEN..PAD_LEN + n].to_vec())
    }

    /// Direct form II transposed, with initial state scaled by `x0`.
    fn lfilter(&self, x: &[f64], x0: f64) -> Vec<f64> {
        let [b0, b1, b2] = self.b;
        let [_, a1, a2] = self.a;
        let mut z0 = self.zi[0] * x0;
        let mut z1 = self.zi[1] * x0;
        x.iter()
            .map(|&xn| {
                let y = b0 * xn + z0;
                z0 = b1 * xn - a1 * y + z1;
                z1 = b2 * xn - a2 * y;
                y
            })
            .collect()
    }
}
