//! Turns a query plus a change bus into an ordered stream of list deltas.

use super::change::ListChange;
use crate::error::{DbError, Result};
use crate::eval::evaluate;
use crate::expr::{values_equal, OrdValue, Query};
use crate::signals::{BusConfig, SignalData, SignalSubscription};
use crate::types::{document_id, to_document, Model};
use crossbeam_channel::{RecvTimeoutError, TryRecvError};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// A collection a live query can follow.
///
/// None of these calls may hold up writers for longer than one commit.
pub trait LiveSource<T: Model>: Send + Sync {
    /// Attach a bus subscriber.
    fn attach(&self, config: &BusConfig) -> SignalSubscription<T>;

    /// Current results of `query`. Writes may commit while it runs.
    fn snapshot(&self, query: &Query) -> Result<Vec<T>>;

    /// Return once every commit visible to an earlier [`snapshot`] has
    /// emitted its signal.
    ///
    /// [`snapshot`]: LiveSource::snapshot
    fn settle(&self);
}

/// A fresh subscription, its snapshot and the signals that arrived while
/// the snapshot was read.
struct Opening<T> {
    subscription: SignalSubscription<T>,
    snapshot: Vec<T>,
    buffered: Vec<SignalData<T>>,
}

/// Configuration for a live query.
#[derive(Clone, Debug)]
pub struct LiveQueryConfig {
    /// Bus buffer for this query.
    /// Default: 1000
    pub buffer_size: usize,

    /// Emit a fresh snapshot after the bus dropped signals for this query.
    /// Default: true
    pub resync_on_lag: bool,
}

impl Default for LiveQueryConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            resync_on_lag: true,
        }
    }
}

struct Tracked<T> {
    doc: Value,
    record: T,
}

/// Pull-based live view of a query.
///
/// The first change is always a snapshot. Later changes are deltas that,
/// applied in order, keep a local list equal to `find()` for queries
/// without a skip/limit window. Windowed queries are diffed the same way;
/// records shifting across the window edge are not re-fetched.
///
/// Dropping the query detaches it from the bus.
pub struct LiveQuery<T: Model> {
    source: Arc<dyn LiveSource<T>>,
    query: Query,
    config: LiveQueryConfig,
    subscription: SignalSubscription<T>,
    tracked: Vec<Tracked<T>>,
    pending: VecDeque<ListChange<T>>,
}

impl<T: Model> LiveQuery<T> {
    pub fn start(source: Arc<dyn LiveSource<T>>, query: Query, config: LiveQueryConfig) -> Result<Self> {
        T::schema().validate_query(&query)?;
        let opening = Self::open(source.as_ref(), &query, &config)?;
        let mut live = Self {
            source,
            query,
            config,
            subscription: opening.subscription,
            tracked: Vec::new(),
            pending: VecDeque::new(),
        };
        live.reset(opening.snapshot, opening.buffered)?;
        Ok(live)
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// The tracked list, in query order.
    pub fn current(&self) -> Vec<T> {
        self.tracked.iter().map(|t| t.record.clone()).collect()
    }

    /// Next change, blocking until one is produced.
    pub fn recv(&mut self) -> Result<ListChange<T>> {
        loop {
            if let Some(change) = self.next_pending()? {
                return Ok(change);
            }
            let signal = self.subscription.recv().map_err(|_| DbError::ChannelClosed)?;
            self.process(signal)?;
        }
    }

    /// Next change if one is available without blocking.
    pub fn try_recv(&mut self) -> Result<Option<ListChange<T>>> {
        loop {
            if let Some(change) = self.next_pending()? {
                return Ok(Some(change));
            }
            match self.subscription.try_recv() {
                Ok(signal) => self.process(signal)?,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(DbError::ChannelClosed),
            }
        }
    }

    /// Next change, waiting at most `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<ListChange<T>>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(change) = self.next_pending()? {
                return Ok(Some(change));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.subscription.recv_timeout(remaining) {
                Ok(signal) => self.process(signal)?,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(DbError::ChannelClosed),
            }
        }
    }

    fn bus_config(config: &LiveQueryConfig) -> BusConfig {
        BusConfig {
            buffer_size: config.buffer_size,
        }
    }

    fn next_pending(&mut self) -> Result<Option<ListChange<T>>> {
        let missed = self.subscription.take_missed();
        if missed > 0 {
            if self.config.resync_on_lag {
                warn!(missed, "live query lagged, resynchronizing");
                self.resync()?;
            } else {
                warn!(missed, "live query lagged, signals lost");
            }
        }
        Ok(self.pending.pop_front())
    }

    /// Attach first, then read the snapshot, then collect every signal
    /// emitted up to the end of the read.
    fn open(source: &dyn LiveSource<T>, query: &Query, config: &LiveQueryConfig) -> Result<Opening<T>> {
        let subscription = source.attach(&Self::bus_config(config));
        let snapshot = source.snapshot(query)?;
        source.settle();
        let buffered = subscription.drain();
        debug!(
            subscriber = subscription.id.0,
            records = snapshot.len(),
            buffered = buffered.len(),
            "live query attached"
        );
        Ok(Opening {
            subscription,
            snapshot,
            buffered,
        })
    }

    /// Replace the bus subscription and tracked state with a fresh snapshot.
    fn resync(&mut self) -> Result<()> {
        let opening = Self::open(self.source.as_ref(), &self.query, &self.config)?;
        self.subscription = opening.subscription;
        self.pending.clear();
        self.reset(opening.snapshot, opening.buffered)
    }

    fn reset(&mut self, snapshot: Vec<T>, buffered: Vec<SignalData<T>>) -> Result<()> {
        self.tracked = snapshot
            .iter()
            .map(|record| {
                Ok(Tracked {
                    doc: to_document(record)?,
                    record: record.clone(),
                })
            })
            .collect::<Result<_>>()?;
        self.pending.push_back(ListChange::whole(snapshot));
        for signal in self.unobserved(buffered)? {
            self.process(signal)?;
        }
        Ok(())
    }

    /// Buffered signals the snapshot does not reflect yet.
    ///
    /// The snapshot shows each record in the state left by some prefix of
    /// its buffered signals. The last signal leaving the record in that
    /// state is the cut; only the signals after it are replayed.
    fn unobserved(&self, buffered: Vec<SignalData<T>>) -> Result<Vec<SignalData<T>>> {
        let id_field = T::id_field();
        let mut ids = Vec::with_capacity(buffered.len());
        let mut cuts: BTreeMap<OrdValue, usize> = BTreeMap::new();

        for (index, signal) in buffered.iter().enumerate() {
            let doc = to_document(&signal.item)?;
            let id = OrdValue(document_id(&doc, id_field).clone());
            let tracked = self
                .tracked
                .iter()
                .find(|t| values_equal(document_id(&t.doc, id_field), &id.0));
            let reflected = match tracked {
                Some(t) => !signal.deleted && t.doc == doc,
                None => signal.deleted || !evaluate(&self.query.condition, &doc),
            };
            if reflected {
                cuts.insert(id.clone(), index);
            }
            ids.push(id);
        }

        let replay: Vec<SignalData<T>> = buffered
            .into_iter()
            .zip(ids)
            .enumerate()
            .filter(|(index, (_, id))| cuts.get(id).map_or(true, |cut| index > cut))
            .map(|(_, (signal, _))| signal)
            .collect();
        trace!(replayed = replay.len(), "buffered signals folded into snapshot");
        Ok(replay)
    }

    fn process(&mut self, signal: SignalData<T>) -> Result<()> {
        let id_field = T::id_field();
        let doc = to_document(&signal.item)?;
        let position = {
            let id = document_id(&doc, id_field);
            self.tracked
                .iter()
                .position(|t| values_equal(document_id(&t.doc, id_field), id))
        };
        let matches = !signal.deleted && evaluate(&self.query.condition, &doc);

        match (matches, position) {
            (false, None) => {}
            (false, Some(index)) => {
                let previous = self.tracked.remove(index);
                self.pending.push_back(ListChange::removed(previous.record));
            }
            (true, Some(index)) if self.tracked[index].doc == doc => {
                trace!("live query skipped unchanged record");
            }
            (true, position) => {
                if let Some(index) = position {
                    self.tracked.remove(index);
                }
                let at = self.tracked.partition_point(|t| {
                    self.query.compare_documents(&t.doc, &doc, id_field) == std::cmp::Ordering::Less
                });
                self.tracked.insert(
                    at,
                    Tracked {
                        doc,
                        record: signal.item.clone(),
                    },
                );
                self.pending.push_back(ListChange::added(signal.item));
            }
        }
        Ok(())
    }
}

impl<T: Model> Iterator for LiveQuery<T> {
    type Item = Result<ListChange<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.recv() {
            Err(DbError::ChannelClosed) => None,
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{FieldCollection, InMemoryFieldCollection, ObservableCollection};
    use crate::expr::{Condition, Modification, SortPart};
    use crate::signals::ChangeBus;
    use crate::testing::User;
    use serde_json::json;

    type Users = ObservableCollection<User, InMemoryFieldCollection<User>>;

    const WAIT: Duration = Duration::from_millis(100);

    fn users() -> Arc<Users> {
        Arc::new(ObservableCollection::new(InMemoryFieldCollection::new()))
    }

    fn watch(collection: &Arc<Users>, query: Query, config: LiveQueryConfig) -> LiveQuery<User> {
        let source: Arc<dyn LiveSource<User>> = collection.clone();
        LiveQuery::start(source, query, config).unwrap()
    }

    #[test]
    fn test_snapshot_then_insert() {
        let collection = users();
        let mut live = watch(&collection, Query::default(), LiveQueryConfig::default());
        collection.insert_one(User::new("1", "No Name", 0)).unwrap();

        assert_eq!(live.recv().unwrap(), ListChange::whole(vec![]));
        let change = live.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(change.new.unwrap().id, "1");
        assert!(live.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_leaving_and_entering_the_condition() {
        let collection = users();
        collection.insert_one(User::new("1", "Ann", 30)).unwrap();
        let adults = Query::new(Condition::field("age", Condition::GreaterOrEqual(json!(18))));
        let mut live = watch(&collection, adults, LiveQueryConfig::default());
        assert_eq!(live.recv().unwrap().whole_list.unwrap().len(), 1);

        collection.insert_one(User::new("2", "Kid", 10)).unwrap();
        collection.update_one_by_id(&"1".to_string(), &Modification::assign("age", 12)).unwrap();
        collection.update_one_by_id(&"2".to_string(), &Modification::assign("age", 20)).unwrap();

        let removal = live.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(removal, ListChange::removed(User::new("1", "Ann", 30)));
        let addition = live.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(addition, ListChange::added(User::new("2", "Kid", 20)));
        assert!(live.try_recv().unwrap().is_none());
        assert_eq!(live.current(), vec![User::new("2", "Kid", 20)]);
    }

    #[test]
    fn test_update_to_same_document_emits_nothing() {
        let collection = users();
        collection.insert_one(User::new("1", "Ann", 30)).unwrap();
        let mut live = watch(&collection, Query::default(), LiveQueryConfig::default());
        live.recv().unwrap();

        collection.update_one_by_id(&"1".to_string(), &Modification::assign("age", 30)).unwrap();
        assert!(live.try_recv().unwrap().is_none());
        assert_eq!(live.current(), vec![User::new("1", "Ann", 30)]);
    }

    #[test]
    fn test_deleting_untracked_record_is_ignored() {
        let collection = users();
        collection.insert_one(User::new("1", "Ann", 30)).unwrap();
        let mut live = watch(&collection, Query::new(Condition::eq("name", "Bob")), LiveQueryConfig::default());
        live.recv().unwrap();

        collection.delete_one_by_id(&"1".to_string()).unwrap();
        assert!(live.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_tracked_list_follows_order() {
        let collection = users();
        let query = Query::default().order_by(SortPart::descending("age"));
        let mut live = watch(&collection, query, LiveQueryConfig::default());

        collection.insert_one(User::new("1", "Ann", 30)).unwrap();
        collection.insert_one(User::new("2", "Bob", 40)).unwrap();
        collection.insert_one(User::new("3", "Cid", 35)).unwrap();
        while live.try_recv().unwrap().is_some() {}

        let ids: Vec<String> = live.current().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
    }

    #[test]
    fn test_lag_triggers_resync() {
        let collection = users();
        let config = LiveQueryConfig {
            buffer_size: 2,
            resync_on_lag: true,
        };
        let mut live = watch(&collection, Query::default(), config);
        live.recv().unwrap();

        for i in 0..5 {
            collection.insert_one(User::new(&i.to_string(), "U", i)).unwrap();
        }

        let change = live.recv().unwrap();
        assert_eq!(change.whole_list.map(|l| l.len()), Some(5));
        assert!(live.try_recv().unwrap().is_none());
    }

    /// Emits `during` while its snapshot is read, as concurrent writers would.
    struct Racing {
        bus: ChangeBus<User>,
        during: Vec<SignalData<User>>,
        snapshot: Vec<User>,
    }

    impl LiveSource<User> for Racing {
        fn attach(&self, config: &BusConfig) -> SignalSubscription<User> {
            self.bus.attach(config)
        }

        fn snapshot(&self, _query: &Query) -> Result<Vec<User>> {
            self.bus.emit_all(self.during.clone());
            Ok(self.snapshot.clone())
        }

        fn settle(&self) {}
    }

    fn race(during: Vec<SignalData<User>>, snapshot: Vec<User>) -> LiveQuery<User> {
        let source: Arc<dyn LiveSource<User>> = Arc::new(Racing {
            bus: ChangeBus::new(),
            during,
            snapshot,
        });
        LiveQuery::start(source, Query::default(), LiveQueryConfig::default()).unwrap()
    }

    #[test]
    fn test_writes_seen_by_snapshot_are_not_replayed() {
        let mut live = race(
            vec![
                SignalData::created(User::new("1", "Ann", 30)),
                SignalData::updated(User::new("1", "Ann", 31)),
                SignalData::created(User::new("2", "Bob", 20)),
            ],
            vec![User::new("1", "Ann", 31)],
        );

        assert_eq!(live.recv().unwrap(), ListChange::whole(vec![User::new("1", "Ann", 31)]));
        assert_eq!(live.try_recv().unwrap(), Some(ListChange::added(User::new("2", "Bob", 20))));
        assert!(live.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_writes_after_snapshot_read_are_replayed() {
        let mut live = race(
            vec![
                SignalData::created(User::new("3", "Cid", 40)),
                SignalData::deleted(User::new("3", "Cid", 40)),
                SignalData::updated(User::new("1", "Ann", 31)),
            ],
            vec![User::new("1", "Ann", 30)],
        );

        assert_eq!(live.recv().unwrap(), ListChange::whole(vec![User::new("1", "Ann", 30)]));
        assert_eq!(live.try_recv().unwrap(), Some(ListChange::added(User::new("1", "Ann", 31))));
        assert!(live.try_recv().unwrap().is_none());
        assert_eq!(live.current(), vec![User::new("1", "Ann", 31)]);
    }

    #[test]
    fn test_drop_detaches() {
        let collection = users();
        let live = watch(&collection, Query::default(), LiveQueryConfig::default());
        assert_eq!(collection.bus().subscriber_count(), 1);
        drop(live);
        assert_eq!(collection.bus().subscriber_count(), 0);
    }
}
