//! Client side of the multiplexed transport.
//!
//! [`ChannelRegistry`] is the whole protocol state: it takes one
//! [`ClientEvent`] at a time and returns the frames to send. After every
//! event it recomputes, per logical channel, whether the channel should be
//! open from three inputs (has consumers, physically connected, current
//! state), so a missed transition corrects itself on the next event.
//!
//! Consumers that join a channel which is already open first receive the
//! data frames the channel has carried so far. When that backlog grew past
//! its limit the channel is restarted instead, and every consumer sees a
//! fresh `Open` as after a reconnect.
//! [`MultiplexClient`] runs a registry on a worker thread.

use super::link::{FrameSink, MemoryLink};
use super::message::{MultiplexMessage, QueryParams};
use crate::error::{DbError, Result};
use crossbeam_channel::{unbounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Identity of a logical channel on one connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub path: String,
    pub params: QueryParams,
}

impl ChannelKey {
    pub fn new(path: impl Into<String>, params: QueryParams) -> Self {
        Self { path: path.into(), params }
    }
}

/// Local consumer of a logical channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConsumerId(pub u64);

/// What a channel consumer observes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The server acknowledged the channel. Repeats after a reconnect.
    Open,
    Data(String),
    /// The server terminated the channel.
    Error(String),
    /// The server ended the channel.
    Closed,
}

/// Inputs to the registry.
pub enum ClientEvent {
    Subscribe {
        key: ChannelKey,
        consumer: ConsumerId,
        sender: Sender<ChannelEvent>,
    },
    Release {
        consumer: ConsumerId,
    },
    Connected,
    Disconnected,
    Frame(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    /// Start frame sent, waiting for the server's.
    Opening,
    Open,
}

struct LogicalChannel {
    /// Id of the current open attempt.
    id: Option<String>,
    state: ChannelState,
    consumers: HashMap<ConsumerId, Sender<ChannelEvent>>,
    /// Data received since the channel opened.
    backlog: Vec<String>,
    /// False once `backlog` overflowed and was dropped.
    backlog_complete: bool,
}

impl LogicalChannel {
    fn new() -> Self {
        Self {
            id: None,
            state: ChannelState::Closed,
            consumers: HashMap::new(),
            backlog: Vec::new(),
            backlog_complete: true,
        }
    }

    fn deliver(&mut self, event: ChannelEvent) {
        self.consumers
            .retain(|_, sender| sender.send(event.clone()).is_ok());
    }

    fn record(&mut self, data: &str, limit: usize) {
        if !self.backlog_complete {
            return;
        }
        if self.backlog.len() >= limit {
            self.backlog = Vec::new();
            self.backlog_complete = false;
        } else {
            self.backlog.push(data.to_string());
        }
    }
}

/// Per-connection logical channel table.
pub struct ChannelRegistry {
    connected: bool,
    /// Data frames kept per open channel for late consumers.
    backlog_limit: usize,
    channels: HashMap<ChannelKey, LogicalChannel>,
    /// Channel id of each open attempt.
    by_id: HashMap<String, ChannelKey>,
    consumers: HashMap<ConsumerId, ChannelKey>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            connected: false,
            backlog_limit: DEFAULT_BACKLOG_LIMIT,
            channels: HashMap::new(),
            by_id: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    pub fn with_backlog_limit(mut self, limit: usize) -> Self {
        self.backlog_limit = limit;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn state(&self, key: &ChannelKey) -> Option<ChannelState> {
        self.channels.get(key).map(|c| c.state)
    }

    /// Apply one event and return the frames to send, in order.
    pub fn handle(&mut self, event: ClientEvent) -> Vec<MultiplexMessage> {
        let mut outbound = Vec::new();
        match event {
            ClientEvent::Subscribe { key, consumer, sender } => {
                let channel = self.channels.entry(key.clone()).or_insert_with(LogicalChannel::new);
                if channel.state == ChannelState::Open {
                    if channel.backlog_complete {
                        let _ = sender.send(ChannelEvent::Open);
                        for data in &channel.backlog {
                            let _ = sender.send(ChannelEvent::Data(data.clone()));
                        }
                    } else if let Some(id) = channel.id.take() {
                        debug!(channel = %id, path = %key.path, "backlog overflowed, restarting channel");
                        outbound.push(MultiplexMessage::end(id.clone()));
                        self.by_id.remove(&id);
                        channel.state = ChannelState::Closed;
                    }
                }
                channel.consumers.insert(consumer, sender);
                self.consumers.insert(consumer, key);
            }
            ClientEvent::Release { consumer } => {
                if let Some(key) = self.consumers.remove(&consumer) {
                    if let Some(channel) = self.channels.get_mut(&key) {
                        channel.consumers.remove(&consumer);
                    }
                }
            }
            ClientEvent::Connected => self.connected = true,
            ClientEvent::Disconnected => {
                self.connected = false;
            }
            ClientEvent::Frame(frame) => self.receive(&frame),
        }
        outbound.extend(self.reconcile());
        outbound
    }

    fn receive(&mut self, frame: &str) {
        let message = match MultiplexMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };
        let Some(key) = self.by_id.get(&message.channel).cloned() else {
            trace!(channel = %message.channel, "frame for unknown channel dropped");
            return;
        };
        let Some(channel) = self.channels.get_mut(&key) else {
            return;
        };

        if message.start {
            channel.state = ChannelState::Open;
            channel.backlog.clear();
            channel.backlog_complete = true;
            debug!(channel = %message.channel, path = %key.path, "channel open");
            channel.deliver(ChannelEvent::Open);
        }
        if let Some(data) = message.data {
            channel.record(&data, self.backlog_limit);
            channel.deliver(ChannelEvent::Data(data));
        }
        let terminal = if let Some(error) = message.error {
            warn!(channel = %message.channel, error = %error, "channel failed");
            Some(ChannelEvent::Error(error))
        } else if message.end {
            debug!(channel = %message.channel, "channel ended by server");
            Some(ChannelEvent::Closed)
        } else {
            None
        };

        if let Some(event) = terminal {
            // The channel is finished for its current consumers; they stop
            // counting toward reopening it.
            if let Some(mut channel) = self.channels.remove(&key) {
                channel.deliver(event);
                for consumer in channel.consumers.keys() {
                    self.consumers.remove(consumer);
                }
            }
            self.by_id.remove(&message.channel);
        }
    }

    /// Bring every channel in line with its desired state.
    fn reconcile(&mut self) -> Vec<MultiplexMessage> {
        let mut outbound = Vec::new();
        let mut finished = Vec::new();

        for (key, channel) in self.channels.iter_mut() {
            let wanted = self.connected && !channel.consumers.is_empty();
            match (wanted, channel.state) {
                (true, ChannelState::Closed) => {
                    let id = new_channel_id();
                    debug!(channel = %id, path = %key.path, "opening channel");
                    outbound.push(MultiplexMessage::start(id.clone(), key.path.clone(), key.params.clone()));
                    self.by_id.insert(id.clone(), key.clone());
                    channel.id = Some(id);
                    channel.state = ChannelState::Opening;
                }
                (false, ChannelState::Opening | ChannelState::Open) => {
                    if let Some(id) = channel.id.take() {
                        if self.connected {
                            debug!(channel = %id, "closing channel");
                            outbound.push(MultiplexMessage::end(id.clone()));
                        }
                        self.by_id.remove(&id);
                    }
                    channel.state = ChannelState::Closed;
                    channel.backlog = Vec::new();
                }
                _ => {}
            }
            if channel.consumers.is_empty() && channel.state == ChannelState::Closed {
                finished.push(key.clone());
            }
        }

        for key in finished {
            self.channels.remove(&key);
        }
        outbound
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

const DEFAULT_BACKLOG_LIMIT: usize = 256;

/// 128 random bits, hex encoded.
fn new_channel_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Configuration for a multiplex client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Name of the worker thread.
    /// Default: "fieldstore-mux-client"
    pub thread_name: String,
    /// Data frames kept per open channel to replay to late consumers.
    /// Default: 256
    pub backlog_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            thread_name: "fieldstore-mux-client".to_string(),
            backlog_limit: DEFAULT_BACKLOG_LIMIT,
        }
    }
}

enum Command {
    Event(ClientEvent),
    Connect(Arc<dyn FrameSink>),
    Shutdown,
}

/// Runs a [`ChannelRegistry`] on a worker thread.
///
/// The physical transport reports itself through [`connected`],
/// [`disconnected`] and [`receive`]; consumers call [`subscribe`].
///
/// [`connected`]: MultiplexClient::connected
/// [`disconnected`]: MultiplexClient::disconnected
/// [`receive`]: MultiplexClient::receive
/// [`subscribe`]: MultiplexClient::subscribe
pub struct MultiplexClient {
    commands: Sender<Command>,
    next_consumer: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl MultiplexClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let (commands, queue) = unbounded();
        let registry = ChannelRegistry::new().with_backlog_limit(config.backlog_limit);
        let worker = thread::Builder::new()
            .name(config.thread_name)
            .spawn(move || run_worker(queue, registry))
            .map_err(|e| DbError::Transport(e.to_string()))?;
        Ok(Self {
            commands,
            next_consumer: AtomicU64::new(1),
            worker: Some(worker),
        })
    }

    /// Open a consumer on `(path, params)`, sharing the logical channel
    /// with other consumers of the same pair.
    pub fn subscribe(&self, path: impl Into<String>, params: QueryParams) -> Result<ChannelSubscription> {
        let consumer = ConsumerId(self.next_consumer.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = unbounded();
        self.send(Command::Event(ClientEvent::Subscribe {
            key: ChannelKey::new(path, params),
            consumer,
            sender,
        }))?;
        Ok(ChannelSubscription {
            consumer,
            receiver,
            commands: self.commands.clone(),
        })
    }

    /// The physical transport is up; frames go to `sink`.
    pub fn connected(&self, sink: Arc<dyn FrameSink>) -> Result<()> {
        self.send(Command::Connect(sink))
    }

    pub fn disconnected(&self) -> Result<()> {
        self.send(Command::Event(ClientEvent::Disconnected))
    }

    /// A frame arrived from the physical transport.
    pub fn receive(&self, frame: String) -> Result<()> {
        self.send(Command::Event(ClientEvent::Frame(frame)))
    }

    /// Drive this client over an in-process link until it disconnects.
    pub fn attach_link(self: &Arc<Self>, link: MemoryLink) -> Result<JoinHandle<()>> {
        let (sink, frames) = link.split();
        self.connected(Arc::new(sink))?;
        let client = Arc::clone(self);
        thread::Builder::new()
            .name("fieldstore-mux-link".to_string())
            .spawn(move || {
                for frame in frames.iter() {
                    if client.receive(frame).is_err() {
                        return;
                    }
                }
                let _ = client.disconnected();
            })
            .map_err(|e| DbError::Transport(e.to_string()))
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| DbError::ChannelClosed)
    }
}

impl Drop for MultiplexClient {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(queue: Receiver<Command>, mut registry: ChannelRegistry) {
    let mut sink: Option<Arc<dyn FrameSink>> = None;

    for command in queue.iter() {
        let outbound = match command {
            Command::Shutdown => break,
            Command::Connect(new_sink) => {
                sink = Some(new_sink);
                registry.handle(ClientEvent::Connected)
            }
            Command::Event(ClientEvent::Disconnected) => {
                sink = None;
                registry.handle(ClientEvent::Disconnected)
            }
            Command::Event(event) => registry.handle(event),
        };

        let Some(sink) = &sink else { continue };
        for message in outbound {
            let frame = match message.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "failed to encode frame");
                    continue;
                }
            };
            if let Err(e) = sink.send(frame) {
                warn!(error = %e, "physical transport rejected frame");
            }
        }
    }
    debug!("multiplex client stopped");
}

/// A consumer's view of a logical channel. Dropping it releases the
/// consumer's reference.
pub struct ChannelSubscription {
    consumer: ConsumerId,
    receiver: Receiver<ChannelEvent>,
    commands: Sender<Command>,
}

impl ChannelSubscription {
    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    pub fn recv(&self) -> std::result::Result<ChannelEvent, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> std::result::Result<ChannelEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<ChannelEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Event(ClientEvent::Release {
            consumer: self.consumer,
        }));
    }
}
