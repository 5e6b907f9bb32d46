//! Source controller: connect, disconnect, and status.
//!
//! The controller is the only writer of [`SourceState`] apart from the
//! ingestion loop's failback path. State is published through a
//! `tokio::sync::watch` channel, so readers always see a whole state and the
//! ingestion loop wakes as soon as it changes.
//!
//! ```text
//!                connect(DEBUG_*)
//!  Disconnected ─────────────────▶ Connected(debug)
//!       ▲  │      connect(real) ok
//!       │  └─────────────────────▶ Connected(live)
//!       │      disconnect / failback     │
//!       └────────────────────────────────┘
//! ```

use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot, watch};

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::source::{DataSource, PortDescriptor};
use crate::sources::live::LiveSource;
use crate::sources::serial::TransportOpener;

/// What the pipeline is currently fed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Nothing is streamed.
    None,
    /// A real serial port.
    Live,
    /// Fallback simulation while disconnected.
    Simulated,
    /// Simulation selected explicitly through a debug port.
    Debug,
}

impl SourceMode {
    pub fn is_simulated(self) -> bool {
        matches!(self, Self::Simulated | Self::Debug)
    }
}

/// Port metadata reported by [`SourceController::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatus {
    pub port: String,
    pub baudrate: u32,
    pub is_open: bool,
}

/// Process-wide source state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    pub connected: bool,
    pub mode: SourceMode,
    pub port: Option<PortStatus>,
}

impl SourceState {
    /// State with no source connected.
    pub fn disconnected(fallback_to_simulation: bool) -> Self {
        Self {
            connected: false,
            mode: if fallback_to_simulation {
                SourceMode::Simulated
            } else {
                SourceMode::None
            },
            port: None,
        }
    }
}

/// A connect target, resolved once from the requested port name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortTarget {
    Debug { name: String, baudrate: u32 },
    Real(PortDescriptor),
}

impl PortTarget {
    pub fn resolve(name: &str, baudrate: u32, debug_prefix: &str) -> Self {
        if name.starts_with(debug_prefix) {
            Self::Debug {
                name: name.to_string(),
                baudrate,
            }
        } else {
            Self::Real(PortDescriptor::new(name, baudrate))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    Success,
    Error,
}

/// Payload returned by every control operation. Errors are reported here,
/// never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: ControlStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub baudrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mode: Option<SourceMode>,
}

impl ControlResponse {
    pub fn success() -> Self {
        Self {
            status: ControlStatus::Success,
            message: None,
            port: None,
            baudrate: None,
            mode: None,
        }
    }

    pub fn connected(port: &str, baudrate: u32, mode: SourceMode) -> Self {
        Self {
            port: Some(port.to_string()),
            baudrate: Some(baudrate),
            mode: Some(mode),
            ..Self::success()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ControlStatus::Error,
            message: Some(message.into()),
            ..Self::success()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ControlStatus::Success
    }
}

/// Instructions from the controller to the ingestion loop.
pub(crate) enum SourceCommand {
    /// Start draining a freshly opened live source.
    Attach(Box<dyn DataSource>),
    /// Drop the live source. The ack fires once the transport is closed.
    Detach(oneshot::Sender<()>),
}

/// Shared handle on the published source state.
#[derive(Debug, Clone)]
pub(crate) struct SharedState {
    tx: Arc<watch::Sender<SourceState>>,
    fallback_to_simulation: bool,
}

impl SharedState {
    pub(crate) fn new(fallback_to_simulation: bool) -> Self {
        let (tx, _) = watch::channel(SourceState::disconnected(fallback_to_simulation));
        Self {
            tx: Arc::new(tx),
            fallback_to_simulation,
        }
    }

    pub(crate) fn snapshot(&self) -> SourceState {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SourceState> {
        self.tx.subscribe()
    }

    pub(crate) fn set(&self, state: SourceState) {
        self.tx.send_replace(state);
    }

    pub(crate) fn set_disconnected(&self) {
        self.set(SourceState::disconnected(self.fallback_to_simulation));
    }

    /// Revert to the disconnected state after a live transport died. The
    /// last port is kept in the status with `is_open: false`.
    pub(crate) fn fail_back(&self) {
        let fallback = self.fallback_to_simulation;
        self.tx.send_if_modified(|state| {
            if state.mode != SourceMode::Live {
                return false;
            }
            let port = state.port.take().map(|p| PortStatus { is_open: false, ..p });
            *state = SourceState {
                port,
                ..SourceState::disconnected(fallback)
            };
            true
        });
    }
}

/// Connect/disconnect/status surface over the running pipeline.
pub struct SourceController {
    config: Arc<PipelineConfig>,
    state: SharedState,
    commands: mpsc::Sender<SourceCommand>,
    opener: Arc<dyn TransportOpener>,
    /// Serializes connect and disconnect against each other.
    switching: Mutex<()>,
}

impl SourceController {
    pub(crate) fn new(
        config: Arc<PipelineConfig>,
        state: SharedState,
        commands: mpsc::Sender<SourceCommand>,
        opener: Arc<dyn TransportOpener>,
    ) -> Self {
        Self {
            config,
            state,
            commands,
            opener,
            switching: Mutex::new(()),
        }
    }

    /// Real ports present on the host, followed by the debug ports.
    pub fn list_sources(&self) -> Vec<String> {
        let mut ports = self.opener.available_ports();
        ports.extend(self.config.debug_ports.iter().cloned());
        ports
    }

    /// Switch to `port`. Debug ports select the simulator without touching
    /// any transport. Real ports are opened at `baudrate` (or the configured
    /// default); on failure the pipeline is left disconnected.
    pub async fn connect(&self, port: &str, baudrate: Option<u32>) -> ControlResponse {
        let port = port.trim();
        if port.is_empty() {
            return ControlResponse::error("no port specified");
        }
        let baudrate = baudrate.unwrap_or(self.config.default_baudrate);
        let _guard = self.switching.lock().await;

        // Any previous transport is closed before the new one is opened.
        self.detach_live().await;

        match PortTarget::resolve(port, baudrate, &self.config.debug_prefix) {
            PortTarget::Debug { name, baudrate } => {
                self.state.set(SourceState {
                    connected: true,
                    mode: SourceMode::Debug,
                    port: Some(PortStatus {
                        port: name.clone(),
                        baudrate,
                        is_open: false,
                    }),
                });
                log::info!("connected to debug port {name}, streaming simulated data");
                ControlResponse::connected(&name, baudrate, SourceMode::Debug)
            }
            PortTarget::Real(descriptor) => match self.open_live(&descriptor).await {
                Ok(source) => {
                    // Publish Live before attaching: a failback raised by the
                    // new source must not be overwritten.
                    self.state.set(SourceState {
                        connected: true,
                        mode: SourceMode::Live,
                        port: Some(PortStatus {
                            port: descriptor.name.clone(),
                            baudrate: descriptor.baudrate,
                            is_open: true,
                        }),
                    });
                    if self.commands.send(SourceCommand::Attach(source)).await.is_err() {
                        self.state.set_disconnected();
                        return ControlResponse::error("ingestion loop is not running");
                    }
                    log::info!("connected to {descriptor}");
                    ControlResponse::connected(
                        &descriptor.name,
                        descriptor.baudrate,
                        SourceMode::Live,
                    )
                }
                Err(e) => {
                    self.state.set_disconnected();
                    log::warn!("{e}");
                    ControlResponse::error(e.to_string())
                }
            },
        }
    }

    /// Close any live transport and fall back to the disconnected state.
    pub async fn disconnect(&self) -> ControlResponse {
        let _guard = self.switching.lock().await;
        self.detach_live().await;
        self.state.set_disconnected();
        log::info!("disconnected, reverting to fallback source");
        ControlResponse::success()
    }

    /// Current source state.
    pub fn status(&self) -> SourceState {
        self.state.snapshot()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }

    async fn detach_live(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(SourceCommand::Detach(ack_tx)).await.is_ok() {
            // A dropped ack means the loop is gone, which also closes the transport.
            let _ = ack_rx.await;
        }
    }

    async fn open_live(&self, descriptor: &PortDescriptor) -> Result<Box<dyn DataSource>> {
        let opener = Arc::clone(&self.opener);
        let target = descriptor.clone();
        let timeout = self.config.read_timeout();
        let transport = tokio::task::spawn_blocking(move || opener.open(&target, timeout))
            .await
            .map_err(io::Error::other)
            .and_then(|opened| opened)
            .map_err(|source| Error::Transport {
                port: descriptor.name.clone(),
                source,
            })?;
        Ok(Box::new(LiveSource::new(transport, &self.config)))
    }
}
