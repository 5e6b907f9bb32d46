//! Live source reading comma-separated records from a serial transport.
//!
//! Record grammar: `cun,guan,chi[,extra[,pulse_rate[,...]]]`. The first three
//! fields are required and must be finite decimals. Field 4 is ignored. A
//! numeric field 5 is taken as the pulse rate. Anything past that is ignored.

use std::io;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::{Error, Result, SourceError};
use crate::sample::SampleSource;
use crate::source::{DataSource, RawRecord, SourcePoll};
use crate::sources::serial::LineTransport;

/// Index of the optional pulse-rate field.
pub const PULSE_RATE_FIELD: usize = 4;

/// Values extracted from one live text record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveFields {
    pub values: [f64; 3],
    pub pulse_rate: Option<f64>,
}

/// Parse one text record.
pub fn parse_record(line: &str) -> Result<LiveFields> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(Error::parse(line, "empty record"));
    }
    let fields: Vec<&str> = trimmed.split(',').map(str::trim).collect();
    if fields.len() < 3 {
        return Err(Error::parse(
            line,
            format!("expected at least 3 fields, got {}", fields.len()),
        ));
    }

    let mut values = [0.0; 3];
    for (i, slot) in values.iter_mut().enumerate() {
        let v: f64 = fields[i]
            .parse()
            .map_err(|_| Error::parse(line, format!("field {} is not a number", i + 1)))?;
        if !v.is_finite() {
            return Err(Error::parse(line, format!("field {} is not finite", i + 1)));
        }
        *slot = v;
    }

    let pulse_rate = fields
        .get(PULSE_RATE_FIELD)
        .and_then(|f| f.parse::<f64>().ok())
        .filter(|v| v.is_finite());

    Ok(LiveFields { values, pulse_rate })
}

/// Hardware source. Stamps each accepted record with a local counter.
pub struct LiveSource {
    transport: Box<dyn LineTransport>,
    step: f64,
    accepted: u64,
    interval: Duration,
}

impl LiveSource {
    pub fn new(transport: Box<dyn LineTransport>, config: &PipelineConfig) -> Self {
        Self {
            transport,
            step: config.live_step_secs,
            accepted: 0,
            interval: config.live_poll_interval(),
        }
    }
}

impl DataSource for LiveSource {
    fn describe(&self) -> String {
        self.transport.descriptor().to_string()
    }

    fn poll_record(&mut self) -> std::result::Result<SourcePoll, SourceError> {
        let line = match self.transport.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(SourcePoll::Pending),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(SourceError::Parse(Error::parse("", e.to_string())));
            }
            Err(e) => return Err(SourceError::Transport(e)),
        };
        if line.trim().is_empty() {
            return Ok(SourcePoll::Pending);
        }
        let fields = parse_record(&line).map_err(SourceError::Parse)?;
        // Counter starts at zero and is bumped before stamping: first record is at one step.
        self.accepted += 1;
        Ok(SourcePoll::Record(RawRecord {
            timestamp: self.accepted as f64 * self.step,
            values: fields.values,
            pulse_rate: fields.pulse_rate,
            source: SampleSource::Hardware,
            status: None,
        }))
    }

    fn cadence(&self) -> Duration {
        self.interval
    }

    fn is_blocking(&self) -> bool {
        true
    }

    fn reopen(&mut self) -> std::io::Result<()> {
        self.transport.reopen()
    }
}
