//! Pipeline assembly and lifecycle.
//!
//! [`Pipeline`] owns every component: the channel buffer, the broadcast hub,
//! the source controller, and the supervised ingestion task. Nothing here is
//! global; the server and the CLI hold a `Pipeline` and reach the parts
//! through its accessors.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::buffer::SharedBuffer;
use crate::config::PipelineConfig;
use crate::controller::{PortStatus, SharedState, SourceController, SourceMode};
use crate::error::Result;
use crate::filter::NotchFilter;
use crate::hub::BroadcastHub;
use crate::ingest::IngestionLoop;
use crate::sample::Position;
use crate::source::DataSource;
use crate::sources::serial::{SerialOpener, TransportOpener};
use crate::sources::simulated::SimulatedSource;

/// Per-position buffer occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferedCounts {
    pub cun: usize,
    pub guan: usize,
    pub chi: usize,
}

/// Read-only status projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub is_connected: bool,
    pub using_simulated_data: bool,
    pub mode: SourceMode,
    pub port_info: Option<PortStatus>,
    pub buffered: BufferedCounts,
    pub viewers: usize,
    pub sampling_rate: f64,
}

/// A running acquisition pipeline.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    buffer: SharedBuffer,
    hub: Arc<BroadcastHub>,
    controller: SourceController,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    /// Start a pipeline reading real serial ports.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: PipelineConfig) -> Result<Self> {
        Self::start_with(config, Arc::new(SerialOpener), None)
    }

    /// Start a pipeline with a custom transport opener and, optionally, a
    /// fixed simulator seed.
    pub fn start_with(
        config: PipelineConfig,
        opener: Arc<dyn TransportOpener>,
        simulator_seed: Option<u64>,
    ) -> Result<Self> {
        config.validate()?;
        let filter = NotchFilter::from_config(&config)?;
        let config = Arc::new(config);

        let buffer = SharedBuffer::new(config.buffer_capacity);
        let hub = Arc::new(BroadcastHub::new(config.viewer_outbox));
        let state = SharedState::new(config.fallback_to_simulation);
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = watch::channel(false);

        let simulator: Box<dyn DataSource> = match simulator_seed {
            Some(seed) => Box::new(SimulatedSource::with_seed(&config, seed)),
            None => Box::new(SimulatedSource::new(&config)),
        };

        let ingest = IngestionLoop::new(
            Arc::clone(&config),
            filter,
            buffer.clone(),
            Arc::clone(&hub),
            state.clone(),
            commands_rx,
            stop_rx,
            simulator,
        );
        let task = tokio::spawn(ingest.run());

        let controller = SourceController::new(Arc::clone(&config), state, commands_tx, opener);

        log::info!(
            "pipeline started: {} Hz, notch {} Hz (Q={}), {} samples per position",
            config.sampling_rate,
            config.notch_frequency,
            config.quality_factor,
            config.buffer_capacity
        );

        Ok(Self {
            config,
            buffer,
            hub,
            controller,
            stop: stop_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn controller(&self) -> &SourceController {
        &self.controller
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// Source state plus buffer and viewer diagnostics.
    pub fn status(&self) -> StatusReport {
        let state = self.controller.status();
        let lengths = self.buffer.lengths();
        StatusReport {
            is_connected: state.connected,
            using_simulated_data: state.mode.is_simulated(),
            mode: state.mode,
            port_info: state.port,
            buffered: BufferedCounts {
                cun: lengths[Position::Cun.index()],
                guan: lengths[Position::Guan.index()],
                chi: lengths[Position::Chi.index()],
            },
            viewers: self.hub.viewer_count(),
            sampling_rate: self.config.sampling_rate,
        }
    }

    /// Stop the ingestion task and wait for it to exit. Idempotent.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::error!("ingestion task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}
