//! Signal types for the per-collection change bus.

use super::bus::BusInner;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Configuration for a bus subscriber.
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Max buffered signals before new ones are dropped for this subscriber.
    /// Default: 1000
    pub buffer_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// Raw write event from a mutating collection operation.
///
/// For deletions `item` is the record as it was before removal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalData<T> {
    pub item: T,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl<T> SignalData<T> {
    pub fn created(item: T) -> Self {
        Self { item, created: true, deleted: false }
    }

    pub fn updated(item: T) -> Self {
        Self { item, created: false, deleted: false }
    }

    pub fn deleted(item: T) -> Self {
        Self { item, created: false, deleted: true }
    }
}

/// Unique identifier for a bus subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

/// Handle to an attached bus subscriber. Dropping it detaches.
pub struct SignalSubscription<T> {
    pub id: SubscriberId,
    /// Channel to receive signals.
    pub receiver: crossbeam_channel::Receiver<SignalData<T>>,
    pub(super) missed: Arc<AtomicU64>,
    pub(super) bus: Weak<BusInner<T>>,
}

impl<T> SignalSubscription<T> {
    /// Receive the next signal (blocking).
    pub fn recv(&self) -> Result<SignalData<T>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a signal (non-blocking).
    pub fn try_recv(&self) -> Result<SignalData<T>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<SignalData<T>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Signals queued right now. Does not wait for signals emitted while
    /// draining.
    pub fn drain(&self) -> Vec<SignalData<T>> {
        let queued = self.receiver.len();
        self.receiver.try_iter().take(queued).collect()
    }

    /// Signals dropped for this subscriber since the last call.
    pub fn take_missed(&self) -> u64 {
        self.missed.swap(0, Ordering::AcqRel)
    }
}

impl<T> Drop for SignalSubscription<T> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}
