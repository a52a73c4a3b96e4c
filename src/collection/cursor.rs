//! Lazy, restartable result sequences.

use crate::error::Result;
use std::sync::Arc;

/// Something that can produce a fresh pass over a result set.
pub trait CursorSource<T>: Send + Sync {
    fn open(&self) -> Box<dyn Iterator<Item = Result<T>> + Send + '_>;
}

/// A query result that is read lazily and may be iterated more than once.
///
/// Each call to [`iter`](Cursor::iter) starts a new pass against the
/// backing store, so it observes the data as of that pass.
pub struct Cursor<T> {
    source: Arc<dyn CursorSource<T>>,
}

impl<T> Clone for Cursor<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Cursor<T> {
    pub fn new(source: Arc<dyn CursorSource<T>>) -> Self {
        Self { source }
    }

    /// A cursor over an already materialized result.
    pub fn from_vec(items: Vec<T>) -> Self {
        Self::new(Arc::new(VecSource(items)))
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = Result<T>> + Send + '_> {
        self.source.open()
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.iter().collect()
    }
}

struct VecSource<T>(Vec<T>);

impl<T: Clone + Send + Sync> CursorSource<T> for VecSource<T> {
    fn open(&self) -> Box<dyn Iterator<Item = Result<T>> + Send + '_> {
        Box::new(self.0.iter().cloned().map(Ok))
    }
}
