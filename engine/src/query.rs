//! Collection queries and feed definitions.
//!
//! A [`Feed`] names a remote collection and how it is scoped to the current
//! principal. Resolving a feed for a principal yields the concrete
//! [`CollectionQuery`] handed to the store.

use crate::{CollectionPath, Document, Principal};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What an equality filter compares against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "camelCase")]
pub enum FilterTarget {
    /// The document identifier
    DocumentId,
    /// A named field
    Field(String),
}

/// Equality filter on a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub target: FilterTarget,
    pub value: Value,
}

impl Filter {
    /// Check if a document passes the filter.
    pub fn matches(&self, doc: &Document) -> bool {
        match &self.target {
            FilterTarget::DocumentId => self.value.as_str() == Some(doc.id.as_str()),
            FilterTarget::Field(name) => doc.get(name) == Some(&self.value),
        }
    }
}

/// A query over one collection, optionally filtered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionQuery {
    pub collection: CollectionPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
}

impl CollectionQuery {
    /// Query every document of a collection.
    pub fn new(collection: impl Into<CollectionPath>) -> Self {
        Self {
            collection: collection.into(),
            filter: None,
        }
    }

    /// Only documents whose `field` equals `value`.
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some(Filter {
            target: FilterTarget::Field(field.into()),
            value: value.into(),
        });
        self
    }

    /// Only the document with the given id.
    pub fn where_id(mut self, id: impl Into<String>) -> Self {
        self.filter = Some(Filter {
            target: FilterTarget::DocumentId,
            value: Value::String(id.into()),
        });
        self
    }

    /// Check if a document belongs to the query result.
    pub fn matches(&self, doc: &Document) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches(doc))
    }
}

/// How a feed narrows its collection for a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Scope {
    /// Every document in the collection
    Global,
    /// Documents whose `field` holds the principal id
    Principal { field: String },
    /// The single document keyed by the principal id
    PrincipalDocument,
}

/// A named remote collection plus its principal scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub collection: CollectionPath,
    pub scope: Scope,
}

impl Feed {
    /// An unfiltered feed (e.g. all parkings).
    pub fn global(collection: impl Into<CollectionPath>) -> Self {
        Self {
            collection: collection.into(),
            scope: Scope::Global,
        }
    }

    /// A feed filtered by `field == principal.id` (e.g. favorites by `userId`).
    pub fn scoped(collection: impl Into<CollectionPath>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            scope: Scope::Principal {
                field: field.into(),
            },
        }
    }

    /// A feed over the document keyed by the principal id.
    pub fn principal_document(collection: impl Into<CollectionPath>) -> Self {
        Self {
            collection: collection.into(),
            scope: Scope::PrincipalDocument,
        }
    }

    /// Resolve the concrete query for a principal.
    pub fn query_for(&self, principal: &Principal) -> CollectionQuery {
        let query = CollectionQuery::new(self.collection.clone());
        match &self.scope {
            Scope::Global => query,
            Scope::Principal { field } => query.where_eq(field.clone(), principal.id.clone()),
            Scope::PrincipalDocument => query.where_id(principal.id.clone()),
        }
    }
}

/// Pick the documents whose ids are in `ids`, keeping list order.
pub fn select_ids<'a, I>(documents: &'a [Document], ids: I) -> Vec<&'a Document>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let wanted: std::collections::BTreeSet<String> =
        ids.into_iter().map(|id| id.as_ref().to_owned()).collect();
    documents
        .iter()
        .filter(|doc| wanted.contains(&doc.id))
        .collect()
}
