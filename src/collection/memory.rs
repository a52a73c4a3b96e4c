//! Reference in-memory collection built on the evaluator.

use super::cursor::{Cursor, CursorSource};
use super::{FieldCollection, UniqueConstraint};
use crate::error::{DbError, Result};
use crate::eval::{apply, evaluate};
use crate::expr::{Condition, Modification, Query};
use crate::types::{from_document, to_document, EntryChange, Model};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use tracing::trace;

/// Collection configuration.
#[derive(Clone, Debug)]
pub struct CollectionConfig {
    /// Declared uniqueness rules. The identifier is always unique.
    pub unique: Vec<UniqueConstraint>,

    /// Records examined per lock acquisition when scanning in id order.
    /// Default: 256
    pub page_size: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            unique: Vec::new(),
            page_size: 256,
        }
    }
}

/// A stored record with its cached document form.
#[derive(Clone)]
struct Entry<T> {
    record: T,
    doc: Value,
}

impl<T: Model> Entry<T> {
    fn new(record: T) -> Result<Self> {
        let doc = to_document(&record)?;
        Ok(Self { record, doc })
    }
}

type Records<T> = BTreeMap<<T as Model>::Id, Entry<T>>;

/// In-memory collection.
///
/// Writes hold the store lock for the whole operation, which serializes
/// concurrent writes. Reads page through the store under short read locks.
pub struct InMemoryFieldCollection<T: Model> {
    records: Arc<RwLock<Records<T>>>,
    config: CollectionConfig,
}

impl<T: Model> InMemoryFieldCollection<T> {
    pub fn new() -> Self {
        Self::with_config(CollectionConfig::default())
    }

    pub fn with_config(config: CollectionConfig) -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
            config,
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_unique(&self, records: &Records<T>, candidate: &Entry<T>) -> Result<()> {
        for constraint in &self.config.unique {
            let Some(key) = constraint.key(&candidate.doc) else { continue };
            let clash = records
                .values()
                .any(|e| e.record.id() != candidate.record.id() && constraint.key(&e.doc).as_ref() == Some(&key));
            if clash {
                return Err(DbError::Conflict {
                    fields: constraint.names(),
                });
            }
        }
        Ok(())
    }

    /// Compute the modified entry, enforcing identifier immutability and
    /// uniqueness against the other records.
    fn modified(&self, records: &Records<T>, entry: &Entry<T>, modification: &Modification) -> Result<Entry<T>> {
        let doc = apply(modification, entry.doc.clone())?;
        let record: T = from_document(doc)?;
        if record.id() != entry.record.id() {
            return Err(DbError::InvalidModification(format!(
                "identifier cannot change ({:?} -> {:?})",
                entry.record.id(),
                record.id()
            )));
        }
        let updated = Entry::new(record)?;
        self.check_unique(records, &updated)?;
        Ok(updated)
    }

    fn validate(&self, condition: &Condition, modification: Option<&Modification>) -> Result<()> {
        let schema = T::schema();
        schema.validate_condition(condition)?;
        if let Some(modification) = modification {
            schema.validate_modification(modification)?;
        }
        Ok(())
    }

    fn insert_entry(&self, records: &mut Records<T>, item: T) -> Result<T> {
        if records.contains_key(item.id()) {
            return Err(DbError::Conflict {
                fields: vec![T::id_field().to_string()],
            });
        }
        let entry = Entry::new(item)?;
        self.check_unique(records, &entry)?;
        let record = entry.record.clone();
        records.insert(record.id().clone(), entry);
        Ok(record)
    }
}

impl<T: Model> Default for InMemoryFieldCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Model> FieldCollection<T> for InMemoryFieldCollection<T> {
    fn find(&self, query: &Query) -> Result<Cursor<T>> {
        T::schema().validate_query(query)?;
        let source: Arc<dyn CursorSource<T>> = if query.is_id_ordered(T::id_field()) {
            Arc::new(IdScan {
                records: Arc::clone(&self.records),
                query: query.clone(),
                page_size: self.config.page_size.max(1),
            })
        } else {
            Arc::new(SortedScan {
                records: Arc::clone(&self.records),
                query: query.clone(),
            })
        };
        Ok(Cursor::new(source))
    }

    fn insert_one(&self, item: T) -> Result<T> {
        let mut records = self.records.write();
        self.insert_entry(&mut records, item)
    }

    fn update_one(&self, condition: &Condition, modification: &Modification) -> Result<EntryChange<T>> {
        self.validate(condition, Some(modification))?;
        let mut records = self.records.write();

        let Some(id) = records
            .iter()
            .find(|(_, e)| evaluate(condition, &e.doc))
            .map(|(id, _)| id.clone())
        else {
            return Ok(EntryChange::none());
        };
        let Some(entry) = records.get(&id) else {
            return Ok(EntryChange::none());
        };
        let updated = self.modified(&records, entry, modification)?;
        let old = entry.record.clone();
        let new = updated.record.clone();
        records.insert(id, updated);

        trace!(id = ?new.id(), "record updated");
        Ok(EntryChange { old: Some(old), new: Some(new) })
    }

    fn update_many_with_changes(
        &self,
        condition: &Condition,
        modification: &Modification,
    ) -> Result<Vec<EntryChange<T>>> {
        self.validate(condition, Some(modification))?;
        let mut records = self.records.write();

        let ids: Vec<T::Id> = records
            .iter()
            .filter(|(_, e)| evaluate(condition, &e.doc))
            .map(|(id, _)| id.clone())
            .collect();

        let mut replaced: Vec<Entry<T>> = Vec::with_capacity(ids.len());
        let mut changes = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(entry) = records.get(&id) else { continue };
            match self.modified(&records, entry, modification) {
                Ok(updated) => {
                    changes.push(EntryChange {
                        old: Some(entry.record.clone()),
                        new: Some(updated.record.clone()),
                    });
                    if let Some(previous) = records.insert(id, updated) {
                        replaced.push(previous);
                    }
                }
                Err(e) => {
                    // Put back what this call already changed.
                    for previous in replaced {
                        records.insert(previous.record.id().clone(), previous);
                    }
                    return Err(e);
                }
            }
        }
        Ok(changes)
    }

    fn upsert_one_with_change(
        &self,
        condition: &Condition,
        modification: &Modification,
        if_absent: T,
    ) -> Result<EntryChange<T>> {
        self.validate(condition, Some(modification))?;
        let mut records = self.records.write();

        let matching: Vec<T::Id> = records
            .iter()
            .filter(|(_, e)| evaluate(condition, &e.doc))
            .map(|(id, _)| id.clone())
            .take(2)
            .collect();

        match matching.as_slice() {
            [] => {
                let inserted = self.insert_entry(&mut records, if_absent)?;
                Ok(EntryChange { old: None, new: Some(inserted) })
            }
            [id] => {
                let Some(entry) = records.get(id) else {
                    return Ok(EntryChange::none());
                };
                let updated = self.modified(&records, entry, modification)?;
                let old = entry.record.clone();
                let new = updated.record.clone();
                records.insert(id.clone(), updated);
                Ok(EntryChange { old: Some(old), new: Some(new) })
            }
            _ => {
                let count = records.values().filter(|e| evaluate(condition, &e.doc)).count();
                Err(DbError::MultipleMatches(count))
            }
        }
    }

    fn delete_one_returning(&self, condition: &Condition) -> Result<Option<T>> {
        self.validate(condition, None)?;
        let mut records = self.records.write();

        let id = records
            .iter()
            .find(|(_, e)| evaluate(condition, &e.doc))
            .map(|(id, _)| id.clone());
        Ok(id.and_then(|id| records.remove(&id)).map(|e| e.record))
    }

    fn delete_many_returning(&self, condition: &Condition) -> Result<Vec<T>> {
        self.validate(condition, None)?;
        let mut records = self.records.write();

        let ids: Vec<T::Id> = records
            .iter()
            .filter(|(_, e)| evaluate(condition, &e.doc))
            .map(|(id, _)| id.clone())
            .collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| records.remove(&id))
            .map(|e| e.record)
            .collect())
    }
}

/// Identifier-ordered scan that pages through the store.
struct IdScan<T: Model> {
    records: Arc<RwLock<Records<T>>>,
    query: Query,
    page_size: usize,
}

impl<T: Model> CursorSource<T> for IdScan<T> {
    fn open(&self) -> Box<dyn Iterator<Item = Result<T>> + Send + '_> {
        let limit = self.query.limit.unwrap_or(usize::MAX);
        let pages = IdPages {
            scan: self,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        };
        Box::new(pages.skip(self.query.skip).take(limit).map(Ok))
    }
}

struct IdPages<'a, T: Model> {
    scan: &'a IdScan<T>,
    after: Option<T::Id>,
    buffer: VecDeque<T>,
    exhausted: bool,
}

impl<T: Model> IdPages<'_, T> {
    fn fill(&mut self) {
        let scan = self.scan;
        let after = self.after.take();
        let lower = match &after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let records = scan.records.read();
        let mut examined = 0;
        for (id, entry) in records.range::<T::Id, _>((lower, Bound::Unbounded)) {
            examined += 1;
            if evaluate(&scan.query.condition, &entry.doc) {
                self.buffer.push_back(entry.record.clone());
            }
            if examined == scan.page_size {
                self.after = Some(id.clone());
                return;
            }
        }
        self.exhausted = true;
    }
}

impl<T: Model> Iterator for IdPages<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while self.buffer.is_empty() && !self.exhausted {
            self.fill();
        }
        self.buffer.pop_front()
    }
}

/// Scan for arbitrary orderings; sorts the matching records per pass.
struct SortedScan<T: Model> {
    records: Arc<RwLock<Records<T>>>,
    query: Query,
}

impl<T: Model> CursorSource<T> for SortedScan<T> {
    fn open(&self) -> Box<dyn Iterator<Item = Result<T>> + Send + '_> {
        let mut matching: Vec<Entry<T>> = {
            let records = self.records.read();
            records
                .values()
                .filter(|e| evaluate(&self.query.condition, &e.doc))
                .cloned()
                .collect()
        };
        let id_field = T::id_field();
        matching.sort_by(|a, b| self.query.compare_documents(&a.doc, &b.doc, id_field));

        let limit = self.query.limit.unwrap_or(usize::MAX);
        Box::new(
            matching
                .into_iter()
                .skip(self.query.skip)
                .take(limit)
                .map(|e| Ok(e.record)),
        )
    }
}
