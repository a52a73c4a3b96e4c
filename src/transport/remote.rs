//! Typed live query over a multiplexed channel.

use super::client::{ChannelEvent, ChannelSubscription, MultiplexClient};
use super::message::QueryParams;
use crate::error::{DbError, Result};
use crate::expr::Query;
use crate::live::ListChange;
use crate::types::Model;
use crossbeam_channel::RecvTimeoutError;
use std::time::{Duration, Instant};

/// Client-side mirror of a server live query.
///
/// Keeps the reconstructed list; a snapshot after a reconnect replaces it.
pub struct RemoteLiveQuery<T: Model> {
    subscription: ChannelSubscription,
    query: Query,
    list: Vec<T>,
}

impl<T: Model> RemoteLiveQuery<T> {
    pub fn open(client: &MultiplexClient, path: impl Into<String>, query: Query) -> Result<Self> {
        let mut params = QueryParams::new();
        params.insert("query".to_string(), vec![serde_json::to_string(&query)?]);
        Ok(Self {
            subscription: client.subscribe(path, params)?,
            query,
            list: Vec::new(),
        })
    }

    pub fn current(&self) -> &[T] {
        &self.list
    }

    /// Next list change, applied to [`current`](Self::current) before it
    /// is returned. `None` on timeout.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<ListChange<T>>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match self.subscription.recv_timeout(remaining) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(DbError::ChannelClosed),
            };
            match event {
                ChannelEvent::Open => continue,
                ChannelEvent::Data(data) => {
                    let change: ListChange<T> = serde_json::from_str(&data)?;
                    change.apply_to(&mut self.list, self.query.comparator::<T>());
                    return Ok(Some(change));
                }
                ChannelEvent::Error(message) => return Err(DbError::Remote(message)),
                ChannelEvent::Closed => return Err(DbError::ChannelClosed),
            }
        }
    }
}
