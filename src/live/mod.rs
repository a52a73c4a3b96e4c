//! Live queries: a snapshot followed by incremental list changes.
//!
//! A [`LiveQuery`] attaches to a collection's change bus and reads its
//! snapshot under the collection's write lock, so no commit falls between
//! the two. Every later signal is re-evaluated against the query and turned
//! into at most one [`ListChange`].

mod change;
mod engine;

pub use change::ListChange;
pub use engine::{LiveQuery, LiveQueryConfig, LiveSource};
