//! Document read and write handlers.

use parkspot_engine::{
    CollectionQuery, CollectionSnapshot, Document, DocumentRef, FieldMutation, Fields, WriteMode,
};
use parkspot_sync::{DocumentStore, MemoryStore};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Equality filter for a collection read.
#[derive(Debug, Default, Deserialize)]
pub struct CollectionParams {
    pub field: Option<String>,
    pub value: Option<String>,
}

/// Options for a document write.
#[derive(Debug, Default, Deserialize)]
pub struct WriteParams {
    #[serde(default)]
    pub merge: bool,
}

/// Field mutations applied atomically to an existing document.
#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateRequest {
    pub mutations: Vec<FieldMutation>,
}

/// Build the query for a collection read.
pub fn collection_query(collection: &str, params: CollectionParams) -> Result<CollectionQuery> {
    let query = CollectionQuery::new(collection);
    match (params.field, params.value) {
        (None, None) => Ok(query),
        (Some(field), Some(value)) if !field.is_empty() => Ok(query.where_eq(field, value)),
        _ => Err(AppError::BadRequest(
            "field and value must be given together".to_string(),
        )),
    }
}

/// Read a collection once.
pub fn handle_query(
    store: &MemoryStore,
    collection: &str,
    params: CollectionParams,
) -> Result<CollectionSnapshot> {
    let query = collection_query(collection, params)?;
    let snapshot = store.query(&query);

    tracing::debug!(
        collection = %collection,
        documents = snapshot.len(),
        "Collection read"
    );

    Ok(snapshot)
}

/// Read a single document.
pub async fn handle_get(store: &MemoryStore, doc: &DocumentRef) -> Result<Document> {
    store
        .get_document(doc)
        .await?
        .ok_or_else(|| AppError::NotFound(doc.to_string()))
}

/// Create or replace a document, or merge fields into it.
pub async fn handle_set(
    store: &MemoryStore,
    doc: &DocumentRef,
    fields: Fields,
    params: WriteParams,
) -> Result<()> {
    let mode = if params.merge {
        WriteMode::Merge
    } else {
        WriteMode::Overwrite
    };
    store.set_document(doc, fields, mode).await?;

    tracing::info!(doc = %doc, ?mode, "Document written");
    Ok(())
}

/// Apply field mutations to an existing document.
pub async fn handle_update(
    store: &MemoryStore,
    doc: &DocumentRef,
    request: UpdateRequest,
) -> Result<()> {
    if request.mutations.is_empty() {
        return Err(AppError::BadRequest("No mutations given".to_string()));
    }

    let count = request.mutations.len();
    store.update_document(doc, request.mutations).await?;

    tracing::info!(doc = %doc, mutations = count, "Document updated");
    Ok(())
}
