//! In-process push-capable document store.
//!
//! Every committed write pushes a fresh, full snapshot to every subscription
//! whose query covers the written collection. Snapshots are sent while the
//! collection is locked, so each subscriber sees writes in commit order.
//!
//! The store also carries the failure hooks the drivers are tested against:
//! one-shot faults per operation, failing every subscription on a
//! collection, and a write latency.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parkspot_engine::{
    mutation, CollectionPath, CollectionQuery, CollectionSnapshot, Document, DocumentId,
    DocumentRef, FieldMutation, Fields, Timestamp, WriteMode,
};
use tokio::sync::mpsc;

use crate::error::{Result, StoreError};
use crate::store::{DocumentStore, Subscription, SubscriptionEvent};

type CollectionDocs = BTreeMap<DocumentId, Fields>;

/// Store operation a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Subscribe,
    Get,
    Set,
    Update,
}

/// A registered subscription.
#[derive(Debug)]
struct Watcher {
    query: CollectionQuery,
    sender: mpsc::UnboundedSender<SubscriptionEvent>,
}

/// Document store held entirely in memory.
///
/// Documents of a collection are kept ordered by id, which is also the
/// order snapshots list them in.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: DashMap<CollectionPath, CollectionDocs>,
    /// Active subscriptions, keyed by subscription ID.
    watchers: Arc<DashMap<String, Watcher>>,
    faults: DashMap<FaultPoint, VecDeque<StoreError>>,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make the next call of `point` fail with `error`.
    ///
    /// Faults queue up: calling this twice fails the next two calls.
    pub fn fail_next(&self, point: FaultPoint, error: StoreError) {
        self.faults.entry(point).or_default().push_back(error);
    }

    /// Fail every subscription on `collection` with `error`.
    ///
    /// Failed subscriptions are removed; their holders receive the error as
    /// the last event. Returns the number of subscriptions failed.
    pub fn fail_subscriptions(&self, collection: &str, error: StoreError) -> usize {
        let failed: Vec<String> = self
            .watchers
            .iter()
            .filter(|entry| entry.value().query.collection == collection)
            .map(|entry| entry.key().clone())
            .collect();

        for id in &failed {
            if let Some((_, watcher)) = self.watchers.remove(id) {
                let _ = watcher.sender.send(SubscriptionEvent::Error(error.clone()));
            }
        }

        tracing::debug!(
            collection = %collection,
            failed = failed.len(),
            error = %error,
            "Failed subscriptions"
        );

        failed.len()
    }

    /// Delay every write by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.watchers.len()
    }

    /// Number of documents in a collection.
    pub fn document_count(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |c| c.len())
    }

    /// Write a document directly, bypassing faults and latency.
    pub fn put(&self, collection: &str, document: Document) {
        let doc_ref = DocumentRef::new(collection, document.id.clone());
        let Document { id, fields } = document;
        // The closure never fails.
        let _ = self.commit(&doc_ref, move |docs| {
            docs.insert(id, fields);
            Ok(())
        });
    }

    /// Delete a document, bypassing faults. Returns whether it existed.
    pub fn delete(&self, doc: &DocumentRef) -> bool {
        let mut existed = false;
        let _ = self.commit(doc, |docs| {
            existed = docs.remove(&doc.id).is_some();
            Ok(())
        });
        existed
    }

    /// Run a query once, without subscribing.
    pub fn query(&self, query: &CollectionQuery) -> CollectionSnapshot {
        match self.collections.get(&query.collection) {
            Some(docs) => snapshot_of(query, docs.value(), now_millis()),
            None => CollectionSnapshot::empty(now_millis()),
        }
    }

    fn take_fault(&self, point: FaultPoint) -> Result<()> {
        match self.faults.get_mut(&point).and_then(|mut queue| queue.pop_front()) {
            Some(error) => {
                tracing::debug!(?point, error = %error, "Injected store fault");
                Err(error)
            }
            None => Ok(()),
        }
    }

    async fn simulate_latency(&self) {
        let millis = self.latency_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    /// Mutate a collection and push the result to its subscribers.
    ///
    /// Subscribers are notified only if `mutate` succeeds.
    fn commit<F>(&self, doc: &DocumentRef, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut CollectionDocs) -> Result<()>,
    {
        let mut docs = self.collections.entry(doc.collection.clone()).or_default();
        mutate(docs.value_mut())?;

        let read_at = now_millis();
        let mut notified = 0;
        for entry in self.watchers.iter() {
            let watcher = entry.value();
            if watcher.query.collection != doc.collection {
                continue;
            }
            let snapshot = snapshot_of(&watcher.query, docs.value(), read_at);
            if watcher.sender.send(SubscriptionEvent::Snapshot(snapshot)).is_ok() {
                notified += 1;
            }
        }

        tracing::debug!(doc = %doc, notified, "Committed write");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn subscribe(&self, query: CollectionQuery) -> Result<Subscription> {
        self.take_fault(FaultPoint::Subscribe)?;

        let id = uuid::Uuid::new_v4().to_string();
        let (sender, events) = mpsc::unbounded_channel();

        // Hold the collection while registering so no write slips between
        // the initial snapshot and the first pushed one.
        {
            let docs = self.collections.entry(query.collection.clone()).or_default();
            let initial = snapshot_of(&query, docs.value(), now_millis());
            let _ = sender.send(SubscriptionEvent::Snapshot(initial));
            self.watchers.insert(
                id.clone(),
                Watcher {
                    query: query.clone(),
                    sender,
                },
            );
        }

        tracing::debug!(subscription = %id, collection = %query.collection, "Subscription opened");

        let watchers = Arc::clone(&self.watchers);
        let sub_id = id.clone();
        Ok(Subscription::new(id, events, move || {
            if watchers.remove(&sub_id).is_some() {
                tracing::debug!(subscription = %sub_id, "Subscription closed");
            }
        }))
    }

    async fn get_document(&self, doc: &DocumentRef) -> Result<Option<Document>> {
        self.take_fault(FaultPoint::Get)?;

        Ok(self.collections.get(&doc.collection).and_then(|docs| {
            docs.get(&doc.id).map(|fields| Document {
                id: doc.id.clone(),
                fields: fields.clone(),
            })
        }))
    }

    async fn set_document(&self, doc: &DocumentRef, fields: Fields, mode: WriteMode) -> Result<()> {
        self.simulate_latency().await;
        self.take_fault(FaultPoint::Set)?;

        self.commit(doc, |docs| {
            mode.apply(docs.entry(doc.id.clone()).or_default(), fields);
            Ok(())
        })
    }

    async fn update_document(&self, doc: &DocumentRef, mutations: Vec<FieldMutation>) -> Result<()> {
        self.simulate_latency().await;
        self.take_fault(FaultPoint::Update)?;

        self.commit(doc, |docs| {
            let current = docs
                .get_mut(&doc.id)
                .ok_or_else(|| StoreError::NotFound(doc.clone()))?;
            mutation::apply_all(current, &mutations);
            Ok(())
        })
    }
}

fn snapshot_of(
    query: &CollectionQuery,
    docs: &CollectionDocs,
    read_at: Timestamp,
) -> CollectionSnapshot {
    let documents = docs
        .iter()
        .map(|(id, fields)| Document {
            id: id.clone(),
            fields: fields.clone(),
        })
        .filter(|doc| query.matches(doc))
        .collect();
    CollectionSnapshot::new(documents, read_at)
}

fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
