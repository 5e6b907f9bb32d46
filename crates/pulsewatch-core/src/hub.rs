//! Fan-out of filtered samples to connected viewers.
//!
//! Each viewer owns a bounded outbox. Publishing never waits: a full outbox
//! drops the sample for that viewer only, a closed outbox unregisters the
//! viewer. Delivery to one viewer never depends on another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{Error, Result};
use crate::sample::Sample;

/// Opaque viewer identity, unique for the life of the hub.
pub type ViewerId = u64;

/// Message queued for a viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Sample(Sample),
    /// Reply to a viewer keepalive.
    Heartbeat,
}

#[derive(Serialize)]
struct HeartbeatFrame {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Wire form of the heartbeat acknowledgement: `{"type":"heartbeat"}`.
pub fn heartbeat_frame() -> String {
    serde_json::to_string(&HeartbeatFrame { kind: "heartbeat" })
        .unwrap_or_else(|_| r#"{"type":"heartbeat"}"#.to_string())
}

/// Receiving half handed to a viewer on registration.
#[derive(Debug)]
pub struct ViewerConnection {
    pub id: ViewerId,
    pub outbox: mpsc::Receiver<HubMessage>,
}

/// Registry of live viewers.
#[derive(Debug)]
pub struct BroadcastHub {
    viewers: RwLock<HashMap<ViewerId, mpsc::Sender<HubMessage>>>,
    next_id: AtomicU64,
    outbox_len: usize,
}

impl BroadcastHub {
    pub fn new(outbox_len: usize) -> Self {
        Self {
            viewers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            outbox_len: outbox_len.max(1),
        }
    }

    /// Add a viewer. It receives every sample published from now on.
    pub fn register(&self) -> ViewerConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.outbox_len);
        self.viewers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        log::info!("viewer {id} connected ({} active)", self.viewer_count());
        ViewerConnection { id, outbox: rx }
    }

    /// Remove a viewer. Unknown ids are ignored.
    pub fn unregister(&self, id: ViewerId) {
        let removed = self
            .viewers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            log::info!("viewer {id} disconnected ({} active)", self.viewer_count());
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Offer `sample` to every registered viewer. Returns how many accepted it.
    pub fn publish(&self, sample: &Sample) -> usize {
        // Snapshot so registration can proceed while we deliver.
        let targets: Vec<(ViewerId, mpsc::Sender<HubMessage>)> = self
            .viewers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(HubMessage::Sample(*sample)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    log::debug!("viewer {id} is behind, dropping sample at t={}", sample.timestamp);
                }
                Err(TrySendError::Closed(_)) => gone.push(id),
            }
        }

        for id in gone {
            log::debug!("{}", Error::Delivery(id));
            self.unregister(id);
        }
        delivered
    }

    /// Queue a heartbeat reply for one viewer.
    ///
    /// A full outbox still counts as delivered: the viewer is alive, just
    /// behind. Fails with [`Error::Delivery`] if the viewer is gone.
    pub fn acknowledge_heartbeat(&self, id: ViewerId) -> Result<()> {
        let tx = self
            .viewers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(Error::Delivery(id))?;
        match tx.try_send(HubMessage::Heartbeat) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Closed(_)) => {
                self.unregister(id);
                Err(Error::Delivery(id))
            }
        }
    }
}
