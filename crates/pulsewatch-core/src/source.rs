//! Abstract data source trait and raw record types.
//!
//! Every producer of pulse readings implements the [`DataSource`] trait. The
//! ingestion loop only sees this trait: it drains whichever source the
//! controller attached, without knowing whether the values come from a
//! serial port or the built-in simulator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::sample::{Position, Regime, SampleSource};

/// A real serial port and the baud rate to open it at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub name: String,
    pub baudrate: u32,
}

impl PortDescriptor {
    pub fn new(name: impl Into<String>, baudrate: u32) -> Self {
        Self {
            name: name.into(),
            baudrate,
        }
    }
}

impl std::fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.baudrate)
    }
}

/// One unfiltered reading as produced by a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRecord {
    pub timestamp: f64,
    /// Values in [`Position::ALL`] order.
    pub values: [f64; 3],
    pub pulse_rate: Option<f64>,
    pub source: SampleSource,
    pub status: Option<Regime>,
}

impl RawRecord {
    pub fn value(&self, position: Position) -> f64 {
        self.values[position.index()]
    }
}

/// Result of a successful poll.
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePoll {
    /// A record is ready.
    Record(RawRecord),
    /// Nothing arrived within the read timeout.
    Pending,
}

/// Trait that every data source must implement.
pub trait DataSource: Send {
    /// Human-readable label for logs and status.
    fn describe(&self) -> String;

    /// Pull the next record.
    ///
    /// Parse failures are reported as [`SourceError::Parse`] and leave the
    /// source usable. [`SourceError::Transport`] means the underlying link
    /// is gone until [`reopen`](Self::reopen) succeeds.
    fn poll_record(&mut self) -> Result<SourcePoll, SourceError>;

    /// Delay between consecutive polls.
    fn cadence(&self) -> Duration;

    /// Whether `poll_record` may block on I/O (bounded by a read timeout).
    fn is_blocking(&self) -> bool {
        false
    }

    /// Try to bring a closed transport back.
    fn reopen(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
