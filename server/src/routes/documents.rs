//! Document endpoint routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use parkspot_engine::{CollectionSnapshot, Document, DocumentRef, Fields};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_get, handle_query, handle_set, handle_update, CollectionParams, UpdateRequest,
    WriteParams,
};
use crate::AppState;

/// Create document routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/documents/{collection}", get(query_handler))
        .route(
            "/documents/{collection}/{id}",
            get(get_handler).put(set_handler).patch(update_handler),
        )
}

/// GET /documents/{collection} - Read a collection, optionally filtered.
async fn query_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(collection): Path<String>,
    Query(params): Query<CollectionParams>,
) -> Result<Json<CollectionSnapshot>> {
    let snapshot = handle_query(&state.store, &collection, params)?;
    Ok(Json(snapshot))
}

/// GET /documents/{collection}/{id} - Read one document.
async fn get_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Document>> {
    let doc = handle_get(&state.store, &DocumentRef::new(collection, id)).await?;
    Ok(Json(doc))
}

/// PUT /documents/{collection}/{id} - Write a document. `?merge=true` keeps
/// fields not present in the body.
async fn set_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((collection, id)): Path<(String, String)>,
    Query(params): Query<WriteParams>,
    Json(fields): Json<Fields>,
) -> Result<StatusCode> {
    let doc = DocumentRef::new(collection, id);
    tracing::debug!(doc = %doc, principal = %auth.principal.id, "Set requested");
    handle_set(&state.store, &doc, fields, params).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /documents/{collection}/{id} - Apply field mutations.
async fn update_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((collection, id)): Path<(String, String)>,
    Json(request): Json<UpdateRequest>,
) -> Result<StatusCode> {
    let doc = DocumentRef::new(collection, id);
    tracing::debug!(doc = %doc, principal = %auth.principal.id, "Update requested");
    handle_update(&state.store, &doc, request).await?;
    Ok(StatusCode::NO_CONTENT)
}
