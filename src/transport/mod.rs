//! Many logical channels over one physical connection.
//!
//! Frames are [`MultiplexMessage`] JSON objects. A client sends a start
//! frame with a fresh channel id, the server answers with its own start
//! frame and then data frames for that id until either side sends an end
//! frame. Consumers of the same `(path, queryParams)` on one connection
//! share a single logical channel.
//!
//! # Example
//!
//! ```ignore
//! let server = MultiplexServer::new(
//!     Router::new().route("/users", LiveQueryHandler::new(users)),
//!     ServerConfig::default(),
//! );
//! let (server_end, client_end) = MemoryLink::pair();
//! let connection = server.accept(Arc::new(server_end));
//!
//! let client = Arc::new(MultiplexClient::new(ClientConfig::default())?);
//! client.attach_link(client_end)?;
//! let mut live = RemoteLiveQuery::<User>::open(&client, "/users", Query::default())?;
//! ```

mod client;
mod link;
mod message;
mod remote;
mod server;

pub use client::{
    ChannelEvent, ChannelKey, ChannelRegistry, ChannelState, ChannelSubscription, ClientConfig, ClientEvent,
    ConsumerId, MultiplexClient,
};
pub use link::{FrameSink, MemoryLink, MemorySink};
pub use message::{MultiplexMessage, QueryParams};
pub use remote::RemoteLiveQuery;
pub use server::{
    ChannelHandler, EventSource, LiveQueryHandler, MultiplexServer, RequestHandler, Router, ServerConfig,
    ServerConnection, SourceEvent,
};
