//! Error taxonomy for the acquisition pipeline.
//!
//! Every failure the pipeline can see falls into one of four recoverable
//! classes. None of them is allowed to stop the ingestion loop or the
//! broadcast hub; callers decide locally how to recover.

use thiserror::Error;

/// Errors raised by pipeline components.
#[derive(Error, Debug)]
pub enum Error {
    /// A live record could not be parsed. The record is dropped.
    #[error("malformed record {line:?}: {reason}")]
    Parse { line: String, reason: String },

    /// Opening, reading, or reopening the live transport failed.
    #[error("transport error on {port}: {source}")]
    Transport {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// The filter engine was handed a window it cannot process.
    #[error("invalid filter input: {0}")]
    InvalidInput(String),

    /// A viewer's outbox is closed.
    #[error("delivery to viewer {0} failed")]
    Delivery(u64),

    /// Configuration is missing, unreadable, or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a failed source poll.
///
/// Split from [`Error`] so the ingestion loop can match on the two cases it
/// recovers from differently: parse errors are skipped, transport errors
/// trigger a reopen.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Parse(Error),

    #[error("transport closed: {0}")]
    Transport(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn parse(line: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_mentions_line_and_reason() {
        let err = Error::parse("1,x", "field 2 is not a number");
        let msg = err.to_string();
        assert!(msg.contains("\"1,x\""));
        assert!(msg.contains("field 2"));
    }

    #[test]
    fn transport_error_keeps_io_source() {
        let err = Error::Transport {
            port: "/dev/ttyUSB0".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"),
        };
        assert!(err.to_string().contains("/dev/ttyUSB0"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
