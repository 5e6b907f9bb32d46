//! The ingestion loop: the single task that drains the active source,
//! filters each record, appends it to the channel buffer, and publishes it.
//!
//! Per iteration the loop applies pending controller commands, reads the
//! current [`SourceState`], and then does one of three things:
//!
//! - connected live: poll the serial source once (on the blocking pool,
//!   bounded by the read timeout), and poll again immediately after a record
//! - simulated (debug port or fallback): tick the simulator, unless nobody
//!   is watching and gating is enabled
//! - otherwise: idle
//!
//! Every wait selects on commands, state changes, and shutdown, so a
//! disconnect is observed within one poll interval.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::buffer::SharedBuffer;
use crate::config::PipelineConfig;
use crate::controller::{SharedState, SourceCommand, SourceMode, SourceState};
use crate::error::SourceError;
use crate::filter::{MIN_HISTORY, NotchFilter};
use crate::hub::BroadcastHub;
use crate::sample::{Position, Sample};
use crate::source::{DataSource, RawRecord, SourcePoll};

pub(crate) struct IngestionLoop {
    config: Arc<PipelineConfig>,
    filter: NotchFilter,
    buffer: SharedBuffer,
    hub: Arc<BroadcastHub>,
    state: SharedState,
    state_rx: watch::Receiver<SourceState>,
    commands: mpsc::Receiver<SourceCommand>,
    stop: watch::Receiver<bool>,
    simulator: Box<dyn DataSource>,
    live: Option<Box<dyn DataSource>>,
}

impl IngestionLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Arc<PipelineConfig>,
        filter: NotchFilter,
        buffer: SharedBuffer,
        hub: Arc<BroadcastHub>,
        state: SharedState,
        commands: mpsc::Receiver<SourceCommand>,
        stop: watch::Receiver<bool>,
        simulator: Box<dyn DataSource>,
    ) -> Self {
        let state_rx = state.subscribe();
        Self {
            config,
            filter,
            buffer,
            hub,
            state,
            state_rx,
            commands,
            stop,
            simulator,
            live: None,
        }
    }

    pub(crate) async fn run(mut self) {
        log::info!("ingestion loop started");
        loop {
            if *self.stop.borrow() {
                break;
            }
            while let Ok(command) = self.commands.try_recv() {
                self.apply(command);
            }

            let state = self.state_rx.borrow_and_update().clone();
            let delay = if state.connected && state.mode == SourceMode::Live {
                self.drain_live().await
            } else if state.mode.is_simulated() {
                self.tick_simulator()
            } else {
                self.config.idle_interval()
            };

            if delay.is_zero() {
                // More data may already be waiting on the wire.
                tokio::task::yield_now().await;
                continue;
            }
            if !self.pause(delay).await {
                break;
            }
        }
        self.live = None;
        log::info!("ingestion loop stopped");
    }

    fn apply(&mut self, command: SourceCommand) {
        match command {
            SourceCommand::Attach(source) => {
                log::debug!("attaching {}", source.describe());
                self.live = Some(source);
            }
            SourceCommand::Detach(ack) => {
                if let Some(source) = self.live.take() {
                    log::debug!("detaching {}", source.describe());
                }
                let _ = ack.send(());
            }
        }
    }

    /// Wait for `delay`, waking early on commands or state changes.
    /// Returns false once the loop should exit.
    async fn pause(&mut self, delay: Duration) -> bool {
        let wake = tokio::select! {
            _ = tokio::time::sleep(delay) => Wake::Elapsed,
            command = self.commands.recv() => match command {
                Some(command) => Wake::Command(command),
                None => Wake::Exit,
            },
            changed = self.state_rx.changed() => match changed {
                Ok(()) => Wake::Elapsed,
                Err(_) => Wake::Exit,
            },
            _ = self.stop.changed() => Wake::Exit,
        };
        match wake {
            Wake::Elapsed => true,
            Wake::Command(command) => {
                self.apply(command);
                true
            }
            Wake::Exit => false,
        }
    }

    fn tick_simulator(&mut self) -> Duration {
        if self.config.simulate_only_with_viewers && self.hub.viewer_count() == 0 {
            return self.config.idle_interval();
        }
        match self.simulator.poll_record() {
            Ok(SourcePoll::Record(record)) => {
                self.ingest(&record);
            }
            Ok(SourcePoll::Pending) => {}
            Err(e) => log::warn!("simulator failed: {e}"),
        }
        self.simulator.cadence()
    }

    async fn drain_live(&mut self) -> Duration {
        let Some(source) = self.live.take() else {
            return self.config.idle_interval();
        };
        let cadence = source.cadence();
        let (source, outcome) = poll(source).await;
        let Some(mut source) = source else {
            self.state.fail_back();
            return self.config.idle_interval();
        };

        match outcome {
            Ok(SourcePoll::Record(record)) => {
                self.ingest(&record);
                self.live = Some(source);
                // Poll again right away; the cadence only applies to empty reads.
                return Duration::ZERO;
            }
            Ok(SourcePoll::Pending) => {}
            Err(SourceError::Parse(e)) => {
                log::warn!("dropping record: {e}");
            }
            Err(SourceError::Transport(e)) => {
                log::warn!("{} failed: {e}; reopening", source.describe());
                let (reopened, result) = reopen(source).await;
                match (reopened, result) {
                    (Some(s), Ok(())) => {
                        log::info!("reopened {}", s.describe());
                        source = s;
                    }
                    (_, result) => {
                        if let Err(e) = result {
                            log::error!("reopen failed: {e}; falling back to simulation");
                        }
                        self.state.fail_back();
                        return self.config.idle_interval();
                    }
                }
            }
        }

        self.live = Some(source);
        cadence
    }

    /// Filter, record, and publish one record. Returns the published sample,
    /// or `None` if the filter rejected any position.
    fn ingest(&mut self, record: &RawRecord) -> Option<Sample> {
        let mut buffer = self.buffer.lock();
        let mut filtered = [0.0; 3];
        for position in Position::ALL {
            let history = buffer.recent(position, MIN_HISTORY);
            match self.filter.apply(&history, record.value(position)) {
                Ok(value) => filtered[position.index()] = value,
                Err(e) => {
                    log::error!("skipping sample at t={}: {position}: {e}", record.timestamp);
                    return None;
                }
            }
        }
        for position in Position::ALL {
            buffer.append(position, record.timestamp, filtered[position.index()]);
        }
        drop(buffer);

        let sample = Sample {
            timestamp: record.timestamp,
            cun: filtered[0],
            guan: filtered[1],
            chi: filtered[2],
            pulse_rate: record.pulse_rate,
            source: record.source,
            status: record.status,
        };
        self.hub.publish(&sample);
        Some(sample)
    }
}

enum Wake {
    Elapsed,
    Command(SourceCommand),
    Exit,
}

type PollOutcome = (Option<Box<dyn DataSource>>, Result<SourcePoll, SourceError>);

/// Poll once, moving blocking sources onto the blocking pool.
async fn poll(mut source: Box<dyn DataSource>) -> PollOutcome {
    if !source.is_blocking() {
        let outcome = source.poll_record();
        return (Some(source), outcome);
    }
    match tokio::task::spawn_blocking(move || {
        let outcome = source.poll_record();
        (source, outcome)
    })
    .await
    {
        Ok((source, outcome)) => (Some(source), outcome),
        Err(e) => {
            log::error!("source poll aborted: {e}");
            (None, Err(SourceError::Transport(io::Error::other(e))))
        }
    }
}

async fn reopen(mut source: Box<dyn DataSource>) -> (Option<Box<dyn DataSource>>, io::Result<()>) {
    match tokio::task::spawn_blocking(move || {
        let result = source.reopen();
        (source, result)
    })
    .await
    {
        Ok((source, result)) => (Some(source), result),
        Err(e) => (None, Err(io::Error::other(e))),
    }
}
