//! Core types shared by collections, the change bus and live queries.

use crate::error::Result;
use crate::expr::{get_path, FieldPath, Schema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::hash::Hash;

/// A record type stored in a collection.
///
/// Records are serialized to JSON documents for evaluation; the schema
/// lists every path expressions may address.
pub trait Model: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Identifier type. Never changes for a stored record.
    type Id: Clone + Ord + Hash + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static;

    fn id(&self) -> &Self::Id;

    /// Field registry, built once per type.
    fn schema() -> &'static Schema;

    /// Path of the identifier inside the document.
    fn id_field() -> &'static FieldPath {
        Self::schema().id_field()
    }
}

/// Serialize a record into its document form.
pub fn to_document<T: Model>(record: &T) -> Result<Value> {
    Ok(serde_json::to_value(record)?)
}

/// Rebuild a record from its document form.
pub fn from_document<T: Model>(doc: Value) -> Result<T> {
    Ok(serde_json::from_value(doc)?)
}

/// Identifier value as stored in documents.
pub fn id_value<T: Model>(id: &T::Id) -> Result<Value> {
    Ok(serde_json::to_value(id)?)
}

/// Identifier of a document, or null.
pub(crate) fn document_id<'a>(doc: &'a Value, id_field: &FieldPath) -> &'a Value {
    get_path(doc, id_field).unwrap_or(&crate::expr::NULL)
}

/// Before/after pair from a single-record mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryChange<T> {
    pub old: Option<T>,
    pub new: Option<T>,
}

impl<T> EntryChange<T> {
    pub fn none() -> Self {
        Self { old: None, new: None }
    }

    pub fn is_empty(&self) -> bool {
        self.old.is_none() && self.new.is_none()
    }

    pub fn created(&self) -> bool {
        self.old.is_none() && self.new.is_some()
    }
}

impl<T> Default for EntryChange<T> {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::User;

    #[test]
    fn test_document_round_trip() {
        let user = User::new("1", "Ann", 30);
        let doc = to_document(&user).unwrap();
        assert_eq!(doc["_id"], "1");
        assert_eq!(document_id(&doc, User::id_field()), "1");
        let back: User = from_document(doc).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn test_entry_change_flags() {
        let created = EntryChange { old: None, new: Some(1) };
        assert!(created.created());
        assert!(!created.is_empty());
        assert!(EntryChange::<i32>::none().is_empty());
    }
}
