//! # Field Store
//!
//! Typed, serializable queries and updates over record collections, with
//! live result sets and subscriptions multiplexed over one connection.
//!
//! ## Core Concepts
//!
//! - **Expressions**: `Condition`, `Modification` and `Aggregate` trees over
//!   a record's document form, with a reference evaluator
//! - **Collections**: the `FieldCollection` CRUD contract and an in-memory
//!   backend built on the evaluator
//! - **Signals**: a per-collection change bus fed by every write
//! - **Live queries**: a snapshot followed by ordered `ListChange` deltas
//! - **Transport**: many logical channels over one physical connection
//!
//! ## Example
//!
//! ```ignore
//! use fieldstore::{Condition, FieldCollection, InMemoryFieldCollection, LiveQuery,
//!     LiveQueryConfig, Modification, ObservableCollection, Query};
//!
//! let users = Arc::new(ObservableCollection::new(InMemoryFieldCollection::<User>::new()));
//! let mut live = LiveQuery::start(users.clone(), Query::default(), LiveQueryConfig::default())?;
//!
//! users.insert_one(user)?;
//! users.update_many(&Condition::eq("name", "Ann"), &Modification::increment("age", 1))?;
//!
//! while let Some(change) = live.try_recv()? {
//!     println!("{:?}", change);
//! }
//! ```

pub mod collection;
pub mod error;
pub mod eval;
pub mod expr;
pub mod live;
pub mod signals;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

// Re-exports
pub use collection::{
    id_condition, CollectionConfig, Cursor, CursorSource, FieldCollection, InMemoryFieldCollection,
    ObservableCollection, UniqueConstraint,
};
pub use error::{DbError, Result};
pub use eval::{apply, apply_to, evaluate, matches, CompiledTranslator, ExpressionTranslator};
pub use expr::{
    Aggregate, Aggregator, Condition, FieldAccessor, FieldPath, FieldRestriction, Modification, OrdValue, Query,
    Schema, SchemaBuilder, SortPart, UpdateRestrictions,
};
pub use live::{ListChange, LiveQuery, LiveQueryConfig, LiveSource};
pub use signals::{BusConfig, ChangeBus, SignalData, SignalSubscription, SubscriberId};
pub use transport::{
    ChannelEvent, ChannelSubscription, ClientConfig, LiveQueryHandler, MemoryLink, MultiplexClient,
    MultiplexMessage, MultiplexServer, QueryParams, RemoteLiveQuery, RequestHandler, Router, ServerConfig,
    ServerConnection,
};
pub use types::{from_document, to_document, EntryChange, Model};
