use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use gridcalc_core::{CellRecord, ChangeEvent, RecordAction, RecordFilter, RecordUpdate};

use super::RecordStore;
use crate::error::PoolError;

/// In-process record store.
///
/// Records are kept per collection, ordered by id. Every mutation is
/// broadcast to matching subscribers; subscribers whose receiver has been
/// dropped are pruned on the next broadcast.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, CellRecord>>,
    subscribers: Vec<Subscriber>,
}

struct Subscriber {
    collection: String,
    filter: RecordFilter,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl Inner {
    fn broadcast(&mut self, collection: &str, action: RecordAction, record: &CellRecord) {
        self.subscribers.retain(|sub| {
            if sub.collection != collection || !sub.filter.matches(record) {
                return !sub.tx.is_closed();
            }
            sub.tx
                .send(ChangeEvent {
                    action,
                    record: record.clone(),
                })
                .is_ok()
        });
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a record. Emits `Create` for a new id and `Update`
    /// for an existing one.
    pub fn insert(&self, collection: &str, record: CellRecord) -> RecordAction {
        let mut inner = self.lock();
        let previous = inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(record.id.clone(), record.clone());
        let action = if previous.is_some() {
            RecordAction::Update
        } else {
            RecordAction::Create
        };
        inner.broadcast(collection, action, &record);
        action
    }

    /// Remove a record, emitting `Delete` when it existed.
    pub fn delete(&self, collection: &str, id: &str) -> Option<CellRecord> {
        let mut inner = self.lock();
        let removed = inner.collections.get_mut(collection)?.remove(id)?;
        inner.broadcast(collection, RecordAction::Delete, &removed);
        Some(removed)
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<CellRecord> {
        self.lock().collections.get(collection)?.get(id).cloned()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.lock().collections.get(collection).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    async fn subscribe(
        &self,
        collection: &str,
        filter: RecordFilter,
    ) -> Result<mpsc::UnboundedReceiver<ChangeEvent>, PoolError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.subscribers.retain(|sub| !sub.tx.is_closed());
        inner.subscribers.push(Subscriber {
            collection: collection.to_string(),
            filter,
            tx,
        });
        debug!(collection, subscribers = inner.subscribers.len(), "Store subscription added");
        Ok(rx)
    }

    async fn query(&self, collection: &str, filter: &RecordFilter) -> Result<Vec<CellRecord>, PoolError> {
        let inner = self.lock();
        let records = inner
            .collections
            .get(collection)
            .map(|records| {
                records
                    .values()
                    .filter(|record| filter.matches(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(records)
    }

    async fn update(&self, collection: &str, id: &str, update: RecordUpdate) -> Result<(), PoolError> {
        let mut inner = self.lock();
        let record = inner
            .collections
            .get_mut(collection)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| PoolError::Store(format!("record {id:?} not found in {collection:?}")))?;
        update.apply_to(record);
        let record = record.clone();
        inner.broadcast(collection, RecordAction::Update, &record);
        Ok(())
    }
}
