//! Physical transport seam.

use crate::error::{DbError, Result};
use crossbeam_channel::{unbounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Outgoing half of a physical duplex connection.
///
/// Retries, backoff and keepalive belong to the implementation.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: String) -> Result<()>;
}

/// One end of an in-process duplex link.
pub struct MemoryLink {
    sender: Sender<String>,
    receiver: Receiver<String>,
}

impl MemoryLink {
    /// Two connected ends. Dropping either disconnects the other.
    pub fn pair() -> (MemoryLink, MemoryLink) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        (
            MemoryLink { sender: a_tx, receiver: b_rx },
            MemoryLink { sender: b_tx, receiver: a_rx },
        )
    }

    /// Split into the outgoing sink and the incoming frames.
    pub fn split(self) -> (MemorySink, Receiver<String>) {
        (MemorySink(self.sender), self.receiver)
    }

    pub fn recv(&self) -> std::result::Result<String, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> std::result::Result<String, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<String, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl FrameSink for MemoryLink {
    fn send(&self, frame: String) -> Result<()> {
        self.sender.send(frame).map_err(|_| DbError::Disconnected)
    }
}

/// Outgoing half of a [`MemoryLink`].
#[derive(Clone)]
pub struct MemorySink(Sender<String>);

impl FrameSink for MemorySink {
    fn send(&self, frame: String) -> Result<()> {
        self.0.send(frame).map_err(|_| DbError::Disconnected)
    }
}
