//! Per-collection change signals.
//!
//! Every successful write on an observable collection emits one
//! [`SignalData`] per affected record, in commit order, to every
//! subscriber attached at that moment. Delivery is best effort: a
//! subscriber whose buffer is full misses signals and can find out via
//! [`SignalSubscription::take_missed`].
//!
//! # Example
//!
//! ```ignore
//! let bus = ChangeBus::new();
//! let handle = bus.attach(&BusConfig::default());
//!
//! bus.emit(SignalData::created(user));
//!
//! while let Ok(signal) = handle.recv() {
//!     println!("{:?} created={} deleted={}", signal.item, signal.created, signal.deleted);
//! }
//! ```

mod bus;
mod types;

pub use bus::ChangeBus;
pub use types::{BusConfig, SignalData, SignalSubscription, SubscriberId};
