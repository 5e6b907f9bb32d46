//! # pulsewatch-core
//!
//! **Real-time three-position pulse acquisition.**
//!
//! `pulsewatch-core` reads cun/guan/chi pulse waveforms from a serial sensor
//! (or a built-in simulator), removes mains interference with a zero-phase
//! notch filter, keeps a bounded per-position history, and fans the filtered
//! samples out to any number of viewers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pulsewatch_core::{Pipeline, PipelineConfig};
//!
//! # async fn demo() -> pulsewatch_core::Result<()> {
//! let pipeline = Pipeline::start(PipelineConfig::default())?;
//! let mut viewer = pipeline.hub().register();
//!
//! let reply = pipeline.controller().connect("DEBUG_COM1", None).await;
//! assert!(reply.is_success());
//!
//! while let Some(message) = viewer.outbox.recv().await {
//!     println!("{message:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Source → Ingestion loop (filter → buffer) → Broadcast hub → Viewers
//!
//! The [`SourceController`] decides which source feeds the loop. Every source
//! implements the [`DataSource`] trait; the live one reads through the
//! [`LineTransport`] seam so it can be driven without hardware.

pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod filter;
pub mod hub;
mod ingest;
pub mod pipeline;
pub mod sample;
pub mod source;
pub mod sources;

pub use buffer::{ChannelBuffer, SharedBuffer};
pub use config::PipelineConfig;
pub use controller::{
    ControlResponse, ControlStatus, PortStatus, PortTarget, SourceController, SourceMode,
    SourceState,
};
pub use error::{Error, Result, SourceError};
pub use filter::NotchFilter;
pub use hub::{BroadcastHub, HubMessage, ViewerConnection, ViewerId, heartbeat_frame};
pub use pipeline::{BufferedCounts, Pipeline, StatusReport};
pub use sample::{DEFAULT_PULSE_RATE, Position, Regime, Sample, SampleRecord, SampleSource};
pub use source::{DataSource, PortDescriptor, RawRecord, SourcePoll};
pub use sources::{LineTransport, LiveSource, SerialOpener, SimulatedSource, TransportOpener};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
