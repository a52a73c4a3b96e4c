//! Error types for collections, live queries and the multiplexed transport.

use thiserror::Error;

/// Main error type for fieldstore operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// An id-keyed operation found no record.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated.
    ///
    /// `fields` names the single field or the composite field set.
    #[error("Unique constraint violated on {}", fields.join(", "))]
    Conflict { fields: Vec<String> },

    /// A path used by an expression is not registered on the record schema.
    #[error("Unknown field path: {0}")]
    UnknownField(String),

    #[error("Invalid modification: {0}")]
    InvalidModification(String),

    #[error("Condition matched {0} records where at most one was expected")]
    MultipleMatches(usize),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A multiplex frame could not be decoded.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The other end of a local channel went away.
    #[error("Channel closed")]
    ChannelClosed,

    /// The physical transport refused a frame.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not connected")]
    Disconnected,

    /// A logical channel was terminated by an error frame.
    #[error("Remote error: {0}")]
    Remote(String),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            DbError::Deserialization(e.to_string())
        } else {
            DbError::Serialization(e.to_string())
        }
    }
}

/// Result type for fieldstore operations.
pub type Result<T> = std::result::Result<T, DbError>;
