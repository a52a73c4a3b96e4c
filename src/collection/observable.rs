//! Collection wrapper that publishes its writes on a change bus.

use super::{Cursor, FieldCollection};
use crate::error::Result;
use crate::expr::{Aggregate, Condition, FieldPath, Modification, OrdValue, Query};
use crate::live::LiveSource;
use crate::signals::{BusConfig, ChangeBus, SignalData, SignalSubscription};
use crate::types::{EntryChange, Model};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::marker::PhantomData;

/// Wraps a backend and emits one [`SignalData`] per affected record.
///
/// A commit and its signals happen under one lock, so signals for a
/// record leave in commit order. Reads never take the lock; a live query
/// only waits on it for the commit in flight.
pub struct ObservableCollection<T: Model, C> {
    inner: C,
    bus: ChangeBus<T>,
    /// Held from commit until its signals are emitted.
    commit_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model, C: FieldCollection<T>> ObservableCollection<T, C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            bus: ChangeBus::new(),
            commit_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn bus(&self) -> &ChangeBus<T> {
        &self.bus
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn emit_change(&self, change: &EntryChange<T>) {
        match (&change.old, &change.new) {
            (None, Some(new)) => self.bus.emit(SignalData::created(new.clone())),
            (Some(_), Some(new)) => self.bus.emit(SignalData::updated(new.clone())),
            (Some(old), None) => self.bus.emit(SignalData::deleted(old.clone())),
            (None, None) => {}
        }
    }
}

impl<T: Model, C: FieldCollection<T>> FieldCollection<T> for ObservableCollection<T, C> {
    fn find(&self, query: &Query) -> Result<Cursor<T>> {
        self.inner.find(query)
    }

    fn insert_one(&self, item: T) -> Result<T> {
        let _guard = self.commit_lock.lock();
        let inserted = self.inner.insert_one(item)?;
        self.bus.emit(SignalData::created(inserted.clone()));
        Ok(inserted)
    }

    fn update_one(&self, condition: &Condition, modification: &Modification) -> Result<EntryChange<T>> {
        let _guard = self.commit_lock.lock();
        let change = self.inner.update_one(condition, modification)?;
        self.emit_change(&change);
        Ok(change)
    }

    fn update_many_with_changes(
        &self,
        condition: &Condition,
        modification: &Modification,
    ) -> Result<Vec<EntryChange<T>>> {
        let _guard = self.commit_lock.lock();
        let changes = self.inner.update_many_with_changes(condition, modification)?;
        for change in &changes {
            self.emit_change(change);
        }
        Ok(changes)
    }

    fn upsert_one_with_change(
        &self,
        condition: &Condition,
        modification: &Modification,
        if_absent: T,
    ) -> Result<EntryChange<T>> {
        let _guard = self.commit_lock.lock();
        let change = self.inner.upsert_one_with_change(condition, modification, if_absent)?;
        self.emit_change(&change);
        Ok(change)
    }

    fn delete_one_returning(&self, condition: &Condition) -> Result<Option<T>> {
        let _guard = self.commit_lock.lock();
        let removed = self.inner.delete_one_returning(condition)?;
        if let Some(old) = &removed {
            self.bus.emit(SignalData::deleted(old.clone()));
        }
        Ok(removed)
    }

    fn delete_many_returning(&self, condition: &Condition) -> Result<Vec<T>> {
        let _guard = self.commit_lock.lock();
        let removed = self.inner.delete_many_returning(condition)?;
        self.bus.emit_all(removed.iter().cloned().map(SignalData::deleted));
        Ok(removed)
    }

    fn count(&self, condition: &Condition) -> Result<usize> {
        self.inner.count(condition)
    }

    fn group_count(&self, condition: &Condition, group_by: &FieldPath) -> Result<BTreeMap<OrdValue, usize>> {
        self.inner.group_count(condition, group_by)
    }

    fn aggregate(&self, condition: &Condition, property: &FieldPath, aggregate: Aggregate) -> Result<Option<f64>> {
        self.inner.aggregate(condition, property, aggregate)
    }

    fn group_aggregate(
        &self,
        condition: &Condition,
        group_by: &FieldPath,
        property: &FieldPath,
        aggregate: Aggregate,
    ) -> Result<BTreeMap<OrdValue, Option<f64>>> {
        self.inner.group_aggregate(condition, group_by, property, aggregate)
    }
}

impl<T: Model, C: FieldCollection<T>> LiveSource<T> for ObservableCollection<T, C> {
    fn attach(&self, config: &BusConfig) -> SignalSubscription<T> {
        self.bus.attach(config)
    }

    fn snapshot(&self, query: &Query) -> Result<Vec<T>> {
        self.inner.find(query)?.to_vec()
    }

    fn settle(&self) {
        drop(self.commit_lock.lock());
    }
}
