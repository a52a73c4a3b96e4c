//! Server side of the multiplexed transport.

use super::link::FrameSink;
use super::message::{MultiplexMessage, QueryParams};
use crate::error::{DbError, Result};
use crate::expr::{Condition, Query};
use crate::live::{LiveQuery, LiveQueryConfig, LiveSource};
use crate::types::Model;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Result of polling an [`EventSource`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    /// One encoded payload for the channel.
    Data(String),
    /// Nothing yet.
    Pending,
    /// The source is done; the channel ends.
    Finished,
}

/// Stream of payloads behind one logical channel.
pub trait EventSource: Send {
    fn poll(&mut self, timeout: Duration) -> Result<SourceEvent>;
}

/// Opens an [`EventSource`] for a start frame's parameters.
pub trait ChannelHandler: Send + Sync {
    fn open(&self, params: &QueryParams) -> Result<Box<dyn EventSource>>;
}

/// Handlers by path.
#[derive(Default)]
pub struct Router {
    handlers: HashMap<String, Arc<dyn ChannelHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, path: impl Into<String>, handler: impl ChannelHandler + 'static) -> Self {
        self.handlers.insert(path.into(), Arc::new(handler));
        self
    }

    pub fn resolve(&self, path: &str) -> Option<Arc<dyn ChannelHandler>> {
        self.handlers.get(path).cloned()
    }
}

/// Configuration for a multiplex server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// How long a channel pump waits on its source before checking for
    /// cancellation.
    /// Default: 50ms
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Accepts physical connections and serves logical channels on them.
pub struct MultiplexServer {
    router: Arc<Router>,
    config: ServerConfig,
}

impl MultiplexServer {
    pub fn new(router: Router, config: ServerConfig) -> Self {
        Self {
            router: Arc::new(router),
            config,
        }
    }

    /// Serve a new physical connection whose outgoing frames go to `sink`.
    pub fn accept(&self, sink: Arc<dyn FrameSink>) -> ServerConnection {
        ServerConnection {
            router: Arc::clone(&self.router),
            config: self.config.clone(),
            sink,
            channels: Mutex::new(HashMap::new()),
        }
    }
}

struct ChannelTask {
    cancel: Arc<AtomicBool>,
    pump: JoinHandle<()>,
}

/// One physical connection. Dropping or closing it cancels every channel.
pub struct ServerConnection {
    router: Arc<Router>,
    config: ServerConfig,
    sink: Arc<dyn FrameSink>,
    channels: Mutex<HashMap<String, ChannelTask>>,
}

impl ServerConnection {
    /// Handle one incoming frame. Malformed frames are logged and dropped.
    pub fn receive(&self, frame: &str) {
        let message = match MultiplexMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };
        self.prune();

        if message.end {
            if let Some(task) = self.channels.lock().remove(&message.channel) {
                debug!(channel = %message.channel, "channel ended by client");
                task.cancel.store(true, Ordering::Release);
            }
            return;
        }
        if message.start {
            self.open(message);
        }
    }

    /// Number of channels with a running pump.
    pub fn open_channels(&self) -> usize {
        self.prune();
        self.channels.lock().len()
    }

    /// Cancel every channel and wait for the pumps to stop.
    pub fn close(&self) {
        let tasks: Vec<ChannelTask> = self.channels.lock().drain().map(|(_, t)| t).collect();
        for task in &tasks {
            task.cancel.store(true, Ordering::Release);
        }
        for task in tasks {
            let _ = task.pump.join();
        }
    }

    fn open(&self, message: MultiplexMessage) {
        let channel = message.channel;
        let path = message.path.unwrap_or_default();
        let params = message.query_params.unwrap_or_default();

        let source = match self.router.resolve(&path) {
            Some(handler) => handler.open(&params),
            None => Err(DbError::NotFound(format!("no handler for path {}", path))),
        };
        let source = match source {
            Ok(source) => source,
            Err(e) => return self.reject(channel, &path, e),
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let pump = {
            let channel = channel.clone();
            let cancel = Arc::clone(&cancel);
            let sink = Arc::clone(&self.sink);
            let poll_interval = self.config.poll_interval;
            thread::Builder::new()
                .name(format!("fieldstore-channel-{}", channel))
                .spawn(move || pump(channel, source, sink, cancel, poll_interval))
                .map_err(|e| DbError::Transport(format!("failed to spawn channel pump: {}", e)))
        };
        let pump = match pump {
            Ok(pump) => pump,
            Err(e) => return self.reject(channel, &path, e),
        };

        debug!(channel = %channel, path = %path, "channel opened");
        if let Some(previous) = self.channels.lock().insert(channel, ChannelTask { cancel, pump }) {
            previous.cancel.store(true, Ordering::Release);
        }
    }

    /// Answer a start that cannot be served with an error frame.
    fn reject(&self, channel: String, path: &str, error: DbError) {
        warn!(channel = %channel, path = %path, error = %error, "channel rejected");
        self.send_frame(&MultiplexMessage::error(channel, error.to_string()));
    }

    /// Forget channels whose source finished on its own.
    fn prune(&self) {
        self.channels.lock().retain(|_, task| !task.pump.is_finished());
    }

    fn send_frame(&self, message: &MultiplexMessage) {
        if let Err(e) = message.encode().and_then(|frame| self.sink.send(frame)) {
            warn!(channel = %message.channel, error = %e, "failed to send frame");
        }
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn pump(
    channel: String,
    mut source: Box<dyn EventSource>,
    sink: Arc<dyn FrameSink>,
    cancel: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    let send = |message: MultiplexMessage| -> Result<()> { sink.send(message.encode()?) };

    if send(MultiplexMessage::opened(channel.clone())).is_err() {
        return;
    }
    while !cancel.load(Ordering::Acquire) {
        let outcome = match source.poll(poll_interval) {
            Ok(SourceEvent::Pending) => continue,
            Ok(SourceEvent::Data(data)) if !cancel.load(Ordering::Acquire) => {
                send(MultiplexMessage::data(channel.clone(), data))
            }
            Ok(SourceEvent::Data(_)) => break,
            Ok(SourceEvent::Finished) => {
                let _ = send(MultiplexMessage::end(channel.clone()));
                break;
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "channel source failed");
                let _ = send(MultiplexMessage::error(channel.clone(), e.to_string()));
                break;
            }
        };
        if let Err(e) = outcome {
            debug!(channel = %channel, error = %e, "connection gone, stopping pump");
            break;
        }
    }
    debug!(channel = %channel, "channel pump stopped");
}

/// Serves a live query per channel.
///
/// The query is read from the `query` parameter as JSON; a missing
/// parameter means every record. The handler's security condition is
/// ANDed onto every query.
pub struct LiveQueryHandler<T: Model> {
    source: Arc<dyn LiveSource<T>>,
    security: Condition,
    config: LiveQueryConfig,
}

impl<T: Model> LiveQueryHandler<T> {
    pub fn new(source: Arc<dyn LiveSource<T>>) -> Self {
        Self {
            source,
            security: Condition::Always,
            config: LiveQueryConfig::default(),
        }
    }

    pub fn with_security(mut self, security: Condition) -> Self {
        self.security = security;
        self
    }

    pub fn with_config(mut self, config: LiveQueryConfig) -> Self {
        self.config = config;
        self
    }
}

impl<T: Model> ChannelHandler for LiveQueryHandler<T> {
    fn open(&self, params: &QueryParams) -> Result<Box<dyn EventSource>> {
        let query = match params.get("query").and_then(|values| values.first()) {
            Some(raw) => serde_json::from_str::<Query>(raw)?,
            None => Query::default(),
        };
        let query = query.restricted_by(self.security.clone());
        let live = LiveQuery::start(Arc::clone(&self.source), query, self.config.clone())?;
        Ok(Box::new(live))
    }
}

impl<T: Model> EventSource for LiveQuery<T> {
    fn poll(&mut self, timeout: Duration) -> Result<SourceEvent> {
        match self.recv_timeout(timeout) {
            Ok(Some(change)) => Ok(SourceEvent::Data(serde_json::to_string(&change)?)),
            Ok(None) => Ok(SourceEvent::Pending),
            Err(DbError::ChannelClosed) => Ok(SourceEvent::Finished),
            Err(e) => Err(e),
        }
    }
}

type Respond = dyn Fn(&QueryParams) -> Result<String> + Send + Sync;

/// Serves one response per channel, then ends it.
pub struct RequestHandler {
    respond: Arc<Respond>,
}

impl RequestHandler {
    pub fn new(respond: impl Fn(&QueryParams) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Arc::new(respond),
        }
    }
}

impl ChannelHandler for RequestHandler {
    fn open(&self, params: &QueryParams) -> Result<Box<dyn EventSource>> {
        Ok(Box::new(OneShot {
            response: Some((self.respond)(params)?),
        }))
    }
}

struct OneShot {
    response: Option<String>,
}

impl EventSource for OneShot {
    fn poll(&mut self, _timeout: Duration) -> Result<SourceEvent> {
        Ok(match self.response.take() {
            Some(response) => SourceEvent::Data(response),
            None => SourceEvent::Finished,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{FieldCollection, InMemoryFieldCollection, ObservableCollection};
    use crate::live::ListChange;
    use crate::testing::User;
    use crate::transport::MemoryLink;

    const WAIT: Duration = Duration::from_secs(1);

    fn next_frame(link: &MemoryLink) -> MultiplexMessage {
        MultiplexMessage::decode(&link.recv_timeout(WAIT).unwrap()).unwrap()
    }

    fn serve(router: Router) -> (ServerConnection, MemoryLink) {
        let server = MultiplexServer::new(
            router,
            ServerConfig {
                poll_interval: Duration::from_millis(10),
            },
        );
        let (server_end, client_end) = MemoryLink::pair();
        (server.accept(Arc::new(server_end)), client_end)
    }

    fn send(connection: &ServerConnection, message: MultiplexMessage) {
        connection.receive(&message.encode().unwrap());
    }

    #[test]
    fn test_unknown_path_gets_error_frame() {
        let (connection, client) = serve(Router::new());
        send(&connection, MultiplexMessage::start("c1", "/missing", QueryParams::new()));

        let frame = next_frame(&client);
        assert_eq!(frame.channel, "c1");
        assert!(frame.error.is_some());
        assert_eq!(connection.open_channels(), 0);
    }

    #[test]
    fn test_rejected_channel_gets_error_frame() {
        let (connection, client) = serve(Router::new());
        connection.reject(
            "c1".to_string(),
            "/users",
            DbError::Transport("failed to spawn channel pump".to_string()),
        );

        let frame = next_frame(&client);
        assert_eq!(frame.channel, "c1");
        assert!(frame.error.unwrap().contains("failed to spawn channel pump"));
        assert_eq!(connection.open_channels(), 0);
    }

    /// Reports the thread it is polled on, once.
    struct PolledOn(bool);

    impl EventSource for PolledOn {
        fn poll(&mut self, _timeout: Duration) -> Result<SourceEvent> {
            if std::mem::replace(&mut self.0, true) {
                return Ok(SourceEvent::Finished);
            }
            Ok(SourceEvent::Data(thread::current().name().unwrap_or_default().to_string()))
        }
    }

    struct PolledOnHandler;

    impl ChannelHandler for PolledOnHandler {
        fn open(&self, _params: &QueryParams) -> Result<Box<dyn EventSource>> {
            Ok(Box::new(PolledOn(false)))
        }
    }

    #[test]
    fn test_channel_pump_runs_on_named_thread() {
        let router = Router::new().route("/name", PolledOnHandler);
        let (connection, client) = serve(router);
        send(&connection, MultiplexMessage::start("c9", "/name", QueryParams::new()));

        assert_eq!(next_frame(&client), MultiplexMessage::opened("c9"));
        assert_eq!(next_frame(&client), MultiplexMessage::data("c9", "fieldstore-channel-c9"));
    }

    #[test]
    fn test_request_handler_answers_once() {
        let router = Router::new().route(
            "/echo",
            RequestHandler::new(|params| Ok(params.get("q").map(|v| v.join(",")).unwrap_or_default())),
        );
        let (connection, client) = serve(router);
        let mut params = QueryParams::new();
        params.insert("q".to_string(), vec!["a".to_string(), "b".to_string()]);
        send(&connection, MultiplexMessage::start("c1", "/echo", params));

        assert_eq!(next_frame(&client), MultiplexMessage::opened("c1"));
        assert_eq!(next_frame(&client), MultiplexMessage::data("c1", "a,b"));
        assert_eq!(next_frame(&client), MultiplexMessage::end("c1"));
    }

    #[test]
    fn test_live_query_channel_with_security() {
        let users = Arc::new(ObservableCollection::new(InMemoryFieldCollection::<User>::new()));
        let source: Arc<dyn LiveSource<User>> = users.clone();
        let router = Router::new().route(
            "/users",
            LiveQueryHandler::new(source).with_security(Condition::field(
                "age",
                Condition::GreaterOrEqual(serde_json::json!(18)),
            )),
        );
        let (connection, client) = serve(router);
        send(&connection, MultiplexMessage::start("c1", "/users", QueryParams::new()));

        assert!(next_frame(&client).start);
        let snapshot: ListChange<User> = serde_json::from_str(&next_frame(&client).data.unwrap()).unwrap();
        assert_eq!(snapshot, ListChange::whole(vec![]));

        users.insert_one(User::new("1", "Kid", 10)).unwrap();
        users.insert_one(User::new("2", "Ann", 30)).unwrap();
        let change: ListChange<User> = serde_json::from_str(&next_frame(&client).data.unwrap()).unwrap();
        assert_eq!(change, ListChange::added(User::new("2", "Ann", 30)));

        send(&connection, MultiplexMessage::end("c1"));
        assert_eq!(connection.open_channels(), 0);

        // The pump notices the cancellation within one poll interval.
        let deadline = std::time::Instant::now() + WAIT;
        while users.bus().subscriber_count() > 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(users.bus().subscriber_count(), 0);
        assert!(client.try_recv().is_err());
    }

    #[test]
    fn test_close_cancels_all_channels() {
        let users = Arc::new(ObservableCollection::new(InMemoryFieldCollection::<User>::new()));
        let source: Arc<dyn LiveSource<User>> = users.clone();
        let (connection, client) = serve(Router::new().route("/users", LiveQueryHandler::new(source)));
        send(&connection, MultiplexMessage::start("c1", "/users", QueryParams::new()));
        send(&connection, MultiplexMessage::start("c2", "/users", QueryParams::new()));
        assert_eq!(connection.open_channels(), 2);

        connection.close();
        assert_eq!(connection.open_channels(), 0);
        assert_eq!(users.bus().subscriber_count(), 0);
        drop(client);
    }

    #[test]
    fn test_bad_query_param_is_channel_error() {
        let users = Arc::new(ObservableCollection::new(InMemoryFieldCollection::<User>::new()));
        let source: Arc<dyn LiveSource<User>> = users.clone();
        let (connection, client) = serve(Router::new().route("/users", LiveQueryHandler::new(source)));
        let mut params = QueryParams::new();
        params.insert("query".to_string(), vec!["{not json".to_string()]);
        send(&connection, MultiplexMessage::start("c1", "/users", params));

        let frame = next_frame(&client);
        assert!(frame.error.is_some());
    }
}
