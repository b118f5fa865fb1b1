//! Parkspot Server - realtime document server for Parkspot clients.
//!
//! Serves collections over HTTP for reads and writes and over WebSocket for
//! push subscriptions. Every committed write pushes a full snapshot to every
//! subscription whose query covers the written collection.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use parkspot_sync::MemoryStore;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::websocket::ConnectionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
}

impl AppState {
    /// State over an empty store.
    pub fn new(config: Config) -> Self {
        Self {
            store: MemoryStore::new_shared(),
            config: Arc::new(config),
            conn_manager: ConnectionManager::new_shared(),
        }
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}
