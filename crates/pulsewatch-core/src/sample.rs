//! Sample types and their wire projection.

use serde::{Deserialize, Serialize};

/// Pulse rate reported for live records that do not carry one (60 × 1.2).
pub const DEFAULT_PULSE_RATE: f64 = 72.0;

/// One of the three measurement positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Cun,
    Guan,
    Chi,
}

impl Position {
    /// All positions in record order.
    pub const ALL: [Position; 3] = [Position::Cun, Position::Guan, Position::Chi];

    pub fn index(self) -> usize {
        match self {
            Self::Cun => 0,
            Self::Guan => 1,
            Self::Chi => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Cun => "cun",
            Self::Guan => "guan",
            Self::Chi => "chi",
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    Hardware,
    Simulation,
}

impl std::fmt::Display for SampleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hardware => write!(f, "hardware"),
            Self::Simulation => write!(f, "simulation"),
        }
    }
}

/// Simulator regime. Alternates every 30 seconds of simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Normal,
    Abnormal,
}

/// One filtered reading across the three positions. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: f64,
    pub cun: f64,
    pub guan: f64,
    pub chi: f64,
    pub pulse_rate: Option<f64>,
    pub source: SampleSource,
    /// Only set by the simulator.
    pub status: Option<Regime>,
}

impl Sample {
    pub fn value(&self, position: Position) -> f64 {
        match position {
            Position::Cun => self.cun,
            Position::Guan => self.guan,
            Position::Chi => self.chi,
        }
    }
}

/// Flat record pushed to viewers.
///
/// `pulse_rate` is always present on the wire: live records without one are
/// reported at [`DEFAULT_PULSE_RATE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub cun: f64,
    pub guan: f64,
    pub chi: f64,
    pub timestamp: f64,
    pub pulse_rate: f64,
    pub sampling_rate: f64,
    pub source: SampleSource,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<Regime>,
}

impl SampleRecord {
    pub fn new(sample: &Sample, sampling_rate: f64) -> Self {
        Self {
            cun: sample.cun,
            guan: sample.guan,
            chi: sample.chi,
            timestamp: sample.timestamp,
            pulse_rate: sample.pulse_rate.unwrap_or(DEFAULT_PULSE_RATE),
            sampling_rate,
            source: sample.source,
            status: sample.status,
        }
    }
}
