//! Change bus broadcasting collection writes to attached subscribers.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{BusConfig, SignalData, SignalSubscription, SubscriberId};

/// Internal subscriber state.
struct Subscriber<T> {
    sender: Sender<SignalData<T>>,
    /// Signals that did not fit the buffer.
    missed: Arc<AtomicU64>,
}

pub(crate) struct BusInner<T> {
    /// Attached subscribers by ID.
    subscribers: RwLock<HashMap<SubscriberId, Subscriber<T>>>,
    /// Counter for generating subscriber IDs.
    next_id: AtomicU64,
}

impl<T> BusInner<T> {
    pub(super) fn remove(&self, id: SubscriberId) {
        if self.subscribers.write().remove(&id).is_some() {
            debug!(subscriber = id.0, "change bus subscriber detached");
        }
    }
}

/// Broadcast point for one collection's write events.
///
/// Writers never block: each subscriber has a bounded queue and a signal
/// that does not fit is dropped for that subscriber and counted as missed.
/// Subscribers only see signals emitted after they attach.
pub struct ChangeBus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T: Clone + Send + 'static> ChangeBus<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Attach a new subscriber.
    pub fn attach(&self, config: &BusConfig) -> SignalSubscription<T> {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));
        let missed = Arc::new(AtomicU64::new(0));

        self.inner.subscribers.write().insert(
            id,
            Subscriber {
                sender,
                missed: Arc::clone(&missed),
            },
        );

        SignalSubscription {
            id,
            receiver,
            missed,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Detach a subscriber. Signals still queued for it stay readable.
    pub fn detach(&self, id: SubscriberId) {
        self.inner.remove(id);
    }

    /// Get subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Broadcast one signal to every attached subscriber.
    pub fn emit(&self, signal: SignalData<T>) {
        let mut gone = Vec::new();

        {
            let subs = self.inner.subscribers.read();
            for (id, sub) in subs.iter() {
                match sub.sender.try_send(signal.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        sub.missed.fetch_add(1, Ordering::AcqRel);
                        warn!(subscriber = id.0, "change bus subscriber lagging, signal dropped");
                    }
                    Err(TrySendError::Disconnected(_)) => gone.push(*id),
                }
            }
        }

        if !gone.is_empty() {
            let mut subs = self.inner.subscribers.write();
            for id in gone {
                subs.remove(&id);
            }
        }
    }

    /// Broadcast signals in order.
    pub fn emit_all(&self, signals: impl IntoIterator<Item = SignalData<T>>) {
        for signal in signals {
            self.emit(signal);
        }
    }
}

impl<T: Clone + Send + 'static> Default for ChangeBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ChangeBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
