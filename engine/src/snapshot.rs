//! Collection snapshots pushed by the remote store.
//!
//! A snapshot is a full, point-in-time materialization of a query result.
//! It is never a diff: consumers replace their list with it wholesale.

use crate::{error::Result, Document, DocumentId, Error, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A point-in-time materialization of a collection query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSnapshot {
    /// Documents in the order the store emitted them
    pub documents: Vec<Document>,
    /// When the store produced the snapshot (milliseconds since epoch)
    #[serde(default)]
    pub read_at: Timestamp,
}

impl CollectionSnapshot {
    /// Create a snapshot from documents in store order.
    pub fn new(documents: Vec<Document>, read_at: Timestamp) -> Self {
        Self { documents, read_at }
    }

    /// An empty snapshot.
    pub fn empty(read_at: Timestamp) -> Self {
        Self::new(Vec::new(), read_at)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Get a document by ID.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    /// Document IDs in snapshot order.
    pub fn ids(&self) -> impl Iterator<Item = &DocumentId> {
        self.documents.iter().map(|d| &d.id)
    }

    /// Check that every document ID is unique within the snapshot.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for doc in &self.documents {
            if !seen.insert(doc.id.as_str()) {
                return Err(Error::DuplicateDocument(doc.id.clone()));
            }
        }
        Ok(())
    }

    /// Union of the string arrays stored under `field` across all documents.
    ///
    /// Documents whose field has the wrong shape are skipped.
    pub fn string_set(&self, field: &str) -> BTreeSet<String> {
        crate::document::union_string_sets(&self.documents, field)
    }

    /// Consume the snapshot, yielding its documents.
    pub fn into_documents(self) -> Vec<Document> {
        self.documents
    }
}
