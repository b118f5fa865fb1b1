//! WebSocket handler for push subscriptions.
//!
//! Handles WebSocket connections, opens store subscriptions on request and
//! forwards their events to the client until it unsubscribes or disconnects.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use parkspot_engine::CollectionQuery;
use parkspot_sync::{DocumentStore, MemoryStore, Subscription, SubscriptionEvent};
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming messages in a loop
/// 4. Cancels the connection's subscriptions on disconnect
pub async fn handle_websocket_connection(
    socket: WebSocket,
    store: Arc<MemoryStore>,
    conn_manager: Arc<ConnectionManager>,
    principal_id: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = conn_manager.register(principal_id.clone(), tx);

    tracing::info!(
        conn_id = %conn_id,
        principal = %principal_id,
        "WebSocket client connected"
    );

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(response) =
                    process_message(&text, &store, &conn_manager, &conn_id).await
                {
                    conn_manager.send_to(&conn_id, response);
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        principal = %principal_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message.
///
/// Returns the direct response, if any. Subscription events are delivered
/// through the connection's channel by the forwarding task.
pub async fn process_message(
    text: &str,
    store: &Arc<MemoryStore>,
    conn_manager: &Arc<ConnectionManager>,
    conn_id: &str,
) -> Option<ServerMessage> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return Some(ServerMessage::error(
                format!("Invalid message format: {}", e),
                None,
            ));
        }
    };

    match client_msg {
        ClientMessage::Subscribe { query, request_id } => {
            subscribe(store, conn_manager, conn_id, query, request_id).await
        }

        ClientMessage::Unsubscribe {
            subscription_id,
            request_id,
        } => {
            if conn_manager.unsubscribe(conn_id, &subscription_id) {
                Some(ServerMessage::Unsubscribed {
                    subscription_id,
                    request_id,
                })
            } else {
                Some(ServerMessage::error(
                    format!("Unknown subscription: {}", subscription_id),
                    request_id,
                ))
            }
        }

        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}

async fn subscribe(
    store: &Arc<MemoryStore>,
    conn_manager: &Arc<ConnectionManager>,
    conn_id: &str,
    query: CollectionQuery,
    request_id: Option<String>,
) -> Option<ServerMessage> {
    let collection = query.collection.clone();
    let subscription = match store.subscribe(query).await {
        Ok(subscription) => subscription,
        Err(e) => return Some(ServerMessage::error(e.to_string(), request_id)),
    };
    let subscription_id = subscription.id().to_string();

    // The acknowledgement must precede the first snapshot on the channel.
    conn_manager.send_to(
        conn_id,
        ServerMessage::Subscribed {
            subscription_id: subscription_id.clone(),
            request_id,
        },
    );

    conn_manager.spawn_subscription(
        conn_id,
        subscription_id.clone(),
        forward(subscription, Arc::clone(conn_manager), conn_id.to_string()),
    );

    tracing::debug!(
        conn_id = %conn_id,
        subscription = %subscription_id,
        collection = %collection,
        "Subscription opened"
    );

    None
}

/// Pump subscription events into the connection until the subscription ends
/// or the connection is gone.
async fn forward(
    mut subscription: Subscription,
    conn_manager: Arc<ConnectionManager>,
    conn_id: String,
) {
    let subscription_id = subscription.id().to_string();

    while let Some(event) = subscription.next_event().await {
        let (message, terminal) = match event {
            SubscriptionEvent::Snapshot(snapshot) => {
                (ServerMessage::snapshot(subscription_id.clone(), snapshot), false)
            }
            SubscriptionEvent::Error(e) => (
                ServerMessage::SubscriptionError {
                    subscription_id: subscription_id.clone(),
                    message: e.to_string(),
                },
                true,
            ),
        };

        if !conn_manager.send_to(&conn_id, message) || terminal {
            break;
        }
    }

    conn_manager.finish_subscription(&subscription_id);
}
