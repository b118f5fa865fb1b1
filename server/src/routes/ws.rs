//! WebSocket upgrade route.

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::auth::AuthUser;
use crate::handlers::handle_websocket_connection;
use crate::AppState;

/// Create WebSocket routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

/// GET /ws - Upgrade to a subscription socket.
async fn ws_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    upgrade: WebSocketUpgrade,
) -> Response {
    let principal_id = auth.principal.id;
    upgrade.on_upgrade(move |socket| {
        handle_websocket_connection(socket, state.store, state.conn_manager, principal_id)
    })
}
