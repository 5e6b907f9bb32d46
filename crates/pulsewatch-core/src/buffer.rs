//! Bounded per-position sample history.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::sample::Position;

/// Fixed-capacity `(timestamp, value)` history for each position.
///
/// Entries are kept in arrival order. Once a position holds `capacity`
/// entries, each append evicts the oldest one.
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    capacity: usize,
    channels: [VecDeque<(f64, f64)>; 3],
}

impl ChannelBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            channels: std::array::from_fn(|_| VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record one value, evicting the oldest if the position is full.
    pub fn append(&mut self, position: Position, timestamp: f64, value: f64) {
        let channel = &mut self.channels[position.index()];
        while channel.len() >= self.capacity {
            channel.pop_front();
        }
        channel.push_back((timestamp, value));
    }

    /// The most recent `k` values for `position`, oldest first.
    ///
    /// Returns fewer than `k` values when the position holds fewer.
    pub fn recent(&self, position: Position, k: usize) -> Vec<f64> {
        let channel = &self.channels[position.index()];
        let skip = channel.len().saturating_sub(k);
        channel.iter().skip(skip).map(|&(_, v)| v).collect()
    }

    pub fn len(&self, position: Position) -> usize {
        self.channels[position.index()].len()
    }

    pub fn is_empty(&self, position: Position) -> bool {
        self.channels[position.index()].is_empty()
    }

    /// Full `(timestamp, value)` history for `position`, oldest first.
    pub fn entries(&self, position: Position) -> Vec<(f64, f64)> {
        self.channels[position.index()].iter().copied().collect()
    }
}

/// Channel buffer shared between the ingestion loop (sole writer) and
/// diagnostic readers.
#[derive(Debug, Clone)]
pub struct SharedBuffer(Arc<Mutex<ChannelBuffer>>);

impl SharedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(Mutex::new(ChannelBuffer::new(capacity))))
    }

    /// Lock the buffer. A poisoned lock still yields the data: every
    /// mutation leaves the buffer consistent.
    pub fn lock(&self) -> MutexGuard<'_, ChannelBuffer> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Per-position lengths in record order.
    pub fn lengths(&self) -> [usize; 3] {
        let buffer = self.lock();
        Position::ALL.map(|p| buffer.len(p))
    }
}
