//! The remote document store port.
//!
//! Live collections and the favorites coordinator only ever talk to a store
//! through [`DocumentStore`], so any push-capable backend (the in-process
//! [`MemoryStore`](crate::MemoryStore), a WebSocket-backed service, a polling
//! emulation) can sit behind them.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use parkspot_engine::{
    CollectionQuery, CollectionSnapshot, Document, DocumentRef, FieldMutation, Fields, WriteMode,
};
use tokio::sync::mpsc;

use crate::error::{Result, StoreError};

/// An event pushed by a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// A full materialization of the query result
    Snapshot(CollectionSnapshot),
    /// The subscription failed; no further events follow
    Error(StoreError),
}

/// A live subscription to a collection query.
///
/// Events arrive in the order the store emitted them. Dropping the
/// subscription unsubscribes.
pub struct Subscription {
    id: String,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap an event channel. `on_drop` runs once when the subscription is
    /// dropped and should release the store-side registration.
    pub fn new(
        id: impl Into<String>,
        events: mpsc::UnboundedReceiver<SubscriptionEvent>,
        on_drop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            events,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// Store-assigned subscription identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next event. `None` once the store closed the channel.
    pub async fn next_event(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }
}

impl Stream for Subscription {
    type Item = SubscriptionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// A remote document database with push subscriptions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open a push subscription. The first event is the current result.
    async fn subscribe(&self, query: CollectionQuery) -> Result<Subscription>;

    /// Read one document.
    async fn get_document(&self, doc: &DocumentRef) -> Result<Option<Document>>;

    /// Create or write a document.
    async fn set_document(&self, doc: &DocumentRef, fields: Fields, mode: WriteMode) -> Result<()>;

    /// Apply field mutations to an existing document.
    ///
    /// Fails with [`StoreError::NotFound`] when the document does not exist.
    async fn update_document(&self, doc: &DocumentRef, mutations: Vec<FieldMutation>) -> Result<()>;
}
