//! The CRUD contract storage backends implement.
//!
//! A backend implements the required methods of [`FieldCollection`]; the
//! provided methods (id-keyed helpers, counts, aggregates) are derived from
//! them and may be overridden with native versions. Wrapping a backend in
//! [`ObservableCollection`] publishes every write on its change bus.

mod cursor;
mod memory;
mod observable;

pub use cursor::{Cursor, CursorSource};
pub use memory::{CollectionConfig, InMemoryFieldCollection};
pub use observable::ObservableCollection;

use crate::error::{DbError, Result};
use crate::expr::{get_path, Aggregate, Condition, FieldPath, Modification, OrdValue, Query, NULL};
use crate::types::{id_value, to_document, EntryChange, Model};
use serde_json::Value;
use std::collections::BTreeMap;

/// A uniqueness rule over one field or a combination of fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UniqueConstraint {
    Unique(FieldPath),
    UniqueSet(Vec<FieldPath>),
}

impl UniqueConstraint {
    pub fn fields(&self) -> Vec<FieldPath> {
        match self {
            UniqueConstraint::Unique(path) => vec![path.clone()],
            UniqueConstraint::UniqueSet(paths) => paths.clone(),
        }
    }

    /// Field names reported in a conflict.
    pub fn names(&self) -> Vec<String> {
        self.fields().iter().map(|p| p.to_string()).collect()
    }

    /// The values this constraint compares for a document, or `None` when
    /// every one of them is null. Such documents never conflict.
    pub fn key(&self, doc: &Value) -> Option<Vec<OrdValue>> {
        let key: Vec<OrdValue> = self
            .fields()
            .iter()
            .map(|p| OrdValue(get_path(doc, p).unwrap_or(&NULL).clone()))
            .collect();
        if key.iter().all(|v| v.0.is_null()) {
            None
        } else {
            Some(key)
        }
    }
}

/// Condition selecting one record by identifier.
pub fn id_condition<T: Model>(id: &T::Id) -> Result<Condition> {
    Ok(Condition::field(
        T::id_field().clone(),
        Condition::Equal(id_value::<T>(id)?),
    ))
}

/// Atomic CRUD over a collection of `T`.
///
/// Single-record operations are atomic: concurrent writes to the same
/// record are serialized, so no update is lost. Condition-based bulk
/// operations treat zero matches as success; only the id-keyed helpers
/// raise [`DbError::NotFound`].
pub trait FieldCollection<T: Model>: Send + Sync {
    /// Records matching the query, in query order.
    fn find(&self, query: &Query) -> Result<Cursor<T>>;

    /// Insert one record, enforcing identifier and declared uniqueness.
    fn insert_one(&self, item: T) -> Result<T>;

    /// Modify the first matching record in identifier order.
    fn update_one(&self, condition: &Condition, modification: &Modification)
        -> Result<EntryChange<T>>;

    /// Modify every matching record and report each change.
    fn update_many_with_changes(
        &self,
        condition: &Condition,
        modification: &Modification,
    ) -> Result<Vec<EntryChange<T>>>;

    /// Modify the single matching record, or insert `if_absent`.
    ///
    /// More than one match is an error.
    fn upsert_one_with_change(
        &self,
        condition: &Condition,
        modification: &Modification,
        if_absent: T,
    ) -> Result<EntryChange<T>>;

    /// Delete the first matching record in identifier order.
    fn delete_one_returning(&self, condition: &Condition) -> Result<Option<T>>;

    fn delete_many_returning(&self, condition: &Condition) -> Result<Vec<T>>;

    /// Insert records one at a time.
    ///
    /// Each record is atomic on its own: a failure stops the call, and
    /// records inserted before it stay committed.
    fn insert(&self, items: Vec<T>) -> Result<Vec<T>> {
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            inserted.push(self.insert_one(item)?);
        }
        Ok(inserted)
    }

    fn get(&self, id: &T::Id) -> Result<Option<T>> {
        let query = Query::new(id_condition::<T>(id)?).limit(1);
        Ok(self.find(&query)?.to_vec()?.into_iter().next())
    }

    fn get_many(&self, ids: &[T::Id]) -> Result<Vec<T>> {
        let values = ids.iter().map(id_value::<T>).collect::<Result<Vec<_>>>()?;
        let condition = Condition::field(T::id_field().clone(), Condition::Inside(values));
        self.find(&Query::new(condition))?.to_vec()
    }

    fn update_one_by_id(&self, id: &T::Id, modification: &Modification) -> Result<EntryChange<T>> {
        let change = self.update_one(&id_condition::<T>(id)?, modification)?;
        if change.is_empty() {
            return Err(DbError::NotFound(format!("{:?}", id)));
        }
        Ok(change)
    }

    fn delete_one_by_id(&self, id: &T::Id) -> Result<T> {
        self.delete_one_returning(&id_condition::<T>(id)?)?
            .ok_or_else(|| DbError::NotFound(format!("{:?}", id)))
    }

    /// Number of records modified.
    fn update_many(&self, condition: &Condition, modification: &Modification) -> Result<usize> {
        Ok(self.update_many_with_changes(condition, modification)?.len())
    }

    /// The record after the upsert.
    fn upsert_one(&self, condition: &Condition, modification: &Modification, if_absent: T) -> Result<T> {
        self.upsert_one_with_change(condition, modification, if_absent)?
            .new
            .ok_or_else(|| DbError::NotFound("upsert produced no record".to_string()))
    }

    fn delete_one(&self, condition: &Condition) -> Result<bool> {
        Ok(self.delete_one_returning(condition)?.is_some())
    }

    fn delete_many(&self, condition: &Condition) -> Result<usize> {
        Ok(self.delete_many_returning(condition)?.len())
    }

    fn count(&self, condition: &Condition) -> Result<usize> {
        let mut count = 0;
        for item in self.find(&Query::new(condition.clone()))?.iter() {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn group_count(&self, condition: &Condition, group_by: &FieldPath) -> Result<BTreeMap<OrdValue, usize>> {
        T::schema().field(group_by)?;
        let mut groups = BTreeMap::new();
        for item in self.find(&Query::new(condition.clone()))?.iter() {
            let doc = to_document(&item?)?;
            let key = OrdValue(get_path(&doc, group_by).unwrap_or(&NULL).clone());
            *groups.entry(key).or_insert(0) += 1;
        }
        Ok(groups)
    }

    /// Reduce the numeric values of `property` over matching records.
    /// Non-numeric values are skipped.
    fn aggregate(&self, condition: &Condition, property: &FieldPath, aggregate: Aggregate) -> Result<Option<f64>> {
        T::schema().field(property)?;
        let mut aggregator = aggregate.aggregator();
        for item in self.find(&Query::new(condition.clone()))?.iter() {
            let doc = to_document(&item?)?;
            if let Some(value) = get_path(&doc, property).and_then(Value::as_f64) {
                aggregator.consume(value);
            }
        }
        Ok(aggregator.complete())
    }

    fn group_aggregate(
        &self,
        condition: &Condition,
        group_by: &FieldPath,
        property: &FieldPath,
        aggregate: Aggregate,
    ) -> Result<BTreeMap<OrdValue, Option<f64>>> {
        T::schema().field(group_by)?;
        T::schema().field(property)?;
        let mut groups = BTreeMap::new();
        for item in self.find(&Query::new(condition.clone()))?.iter() {
            let doc = to_document(&item?)?;
            let key = OrdValue(get_path(&doc, group_by).unwrap_or(&NULL).clone());
            let aggregator = groups.entry(key).or_insert_with(|| aggregate.aggregator());
            if let Some(value) = get_path(&doc, property).and_then(Value::as_f64) {
                aggregator.consume(value);
            }
        }
        Ok(groups.into_iter().map(|(k, a)| (k, a.complete())).collect())
    }
}
