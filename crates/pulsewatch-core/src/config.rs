//! Pipeline configuration.
//!
//! All constants the pipeline depends on live here: filter parameters, buffer
//! capacity, serial defaults, debug port sentinels, and loop cadences. The
//! struct deserializes from partial JSON; any field left out keeps its default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables for acquisition, filtering, and fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Nominal sampling rate in Hz. Also emitted with every sample.
    pub sampling_rate: f64,
    /// Interference frequency rejected by the notch filter, in Hz.
    pub notch_frequency: f64,
    /// Quality factor of the notch.
    pub quality_factor: f64,
    /// Maximum samples kept per position.
    pub buffer_capacity: usize,
    /// Baud rate used when a connect request does not name one.
    pub default_baudrate: u32,
    /// Virtual ports offered next to the real ones.
    pub debug_ports: Vec<String>,
    /// Any port name starting with this prefix selects the simulator.
    pub debug_prefix: String,
    /// Poll interval while no source is connected.
    pub idle_interval_ms: u64,
    /// Delay between read attempts on a live source.
    pub live_poll_interval_ms: u64,
    /// Read timeout on the serial transport.
    pub read_timeout_ms: u64,
    /// Simulated clock advance per tick, in seconds. Also the tick period.
    pub simulation_step_secs: f64,
    /// Timestamp advance per accepted live record, in seconds.
    pub live_step_secs: f64,
    /// Per-viewer outbox depth. A full outbox drops samples for that viewer.
    pub viewer_outbox: usize,
    /// Only tick the simulator while at least one viewer is attached.
    pub simulate_only_with_viewers: bool,
    /// Keep streaming simulated data while no source is connected.
    pub fallback_to_simulation: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 1000.0,
            notch_frequency: 50.0,
            quality_factor: 30.0,
            buffer_capacity: 1000,
            default_baudrate: 115_200,
            debug_ports: vec![
                "DEBUG_COM1".to_string(),
                "DEBUG_COM2".to_string(),
                "DEBUG_COM3".to_string(),
            ],
            debug_prefix: "DEBUG_".to_string(),
            idle_interval_ms: 500,
            live_poll_interval_ms: 10,
            read_timeout_ms: 100,
            simulation_step_secs: 0.1,
            live_step_secs: 0.001,
            viewer_outbox: 32,
            simulate_only_with_viewers: true,
            fallback_to_simulation: true,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the filter or the loops cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.sampling_rate.is_finite() && self.sampling_rate > 0.0) {
            return Err(Error::Config(format!(
                "sampling_rate must be positive, got {}",
                self.sampling_rate
            )));
        }
        if !(self.notch_frequency.is_finite() && self.notch_frequency > 0.0) {
            return Err(Error::Config(format!(
                "notch_frequency must be positive, got {}",
                self.notch_frequency
            )));
        }
        if self.notch_frequency >= self.sampling_rate / 2.0 {
            return Err(Error::Config(format!(
                "notch_frequency {} Hz is at or above Nyquist ({} Hz)",
                self.notch_frequency,
                self.sampling_rate / 2.0
            )));
        }
        if !(self.quality_factor.is_finite() && self.quality_factor > 0.0) {
            return Err(Error::Config(format!(
                "quality_factor must be positive, got {}",
                self.quality_factor
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(Error::Config("buffer_capacity must be at least 1".into()));
        }
        if self.viewer_outbox == 0 {
            return Err(Error::Config("viewer_outbox must be at least 1".into()));
        }
        if !(self.simulation_step_secs > 0.0 && self.live_step_secs > 0.0) {
            return Err(Error::Config("timestamp steps must be positive".into()));
        }
        if self.debug_prefix.is_empty() {
            return Err(Error::Config("debug_prefix must not be empty".into()));
        }
        Ok(())
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn live_poll_interval(&self) -> Duration {
        Duration::from_millis(self.live_poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn simulation_interval(&self) -> Duration {
        Duration::from_secs_f64(self.simulation_step_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_deployment_constants() {
        let c = PipelineConfig::default();
        assert_eq!(c.sampling_rate, 1000.0);
        assert_eq!(c.notch_frequency, 50.0);
        assert_eq!(c.quality_factor, 30.0);
        assert_eq!(c.buffer_capacity, 1000);
        assert_eq!(c.default_baudrate, 115_200);
        assert_eq!(c.debug_ports.len(), 3);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn notch_above_nyquist_is_rejected() {
        let c = PipelineConfig {
            notch_frequency: 600.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(c.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let c = PipelineConfig {
            buffer_capacity: 0,
            ..PipelineConfig::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"buffer_capacity": 250, "notch_frequency": 60.0}}"#).unwrap();
        let c = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(c.buffer_capacity, 250);
        assert_eq!(c.notch_frequency, 60.0);
        assert_eq!(c.sampling_rate, 1000.0);
        assert_eq!(c.debug_prefix, "DEBUG_");
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let err = PipelineConfig::from_json_file("/nonexistent/pulsewatch.json").unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
