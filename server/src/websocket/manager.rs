//! WebSocket connection manager.
//!
//! Tracks active WebSocket connections and the store subscriptions each of
//! them opened. A subscription is owned by the forwarding task that pumps its
//! events into the connection's channel; aborting the task drops the
//! subscription, which unregisters it from the store.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Principal the connection authenticated as
    pub principal_id: String,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
}

/// A store subscription forwarded to one connection.
#[derive(Debug)]
struct Forwarder {
    conn_id: String,
    task: JoinHandle<()>,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    connections: DashMap<String, Connection>,
    /// Forwarding tasks, keyed by subscription ID.
    forwarders: DashMap<String, Forwarder>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, principal_id: String, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        let connection = Connection {
            id: conn_id.clone(),
            principal_id,
            sender,
        };
        self.connections.insert(conn_id.clone(), connection);

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection and cancel every subscription it opened.
    pub fn unregister(&self, conn_id: &str) {
        let owned: Vec<String> = self
            .forwarders
            .iter()
            .filter(|entry| entry.value().conn_id == conn_id)
            .map(|entry| entry.key().clone())
            .collect();
        for subscription_id in &owned {
            self.cancel(subscription_id);
        }

        if let Some((_, conn)) = self.connections.remove(conn_id) {
            tracing::info!(
                conn_id = %conn_id,
                principal = %conn.principal_id,
                subscriptions = owned.len(),
                "WebSocket connection unregistered"
            );
        }
    }

    /// Spawn the forwarding task of a subscription opened by `conn_id`.
    ///
    /// The entry is held while the task is spawned, so a task that ends
    /// right away still finds itself registered in `finish_subscription`.
    pub fn spawn_subscription<F>(&self, conn_id: &str, subscription_id: String, forward: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let entry = self.forwarders.entry(subscription_id);
        let task = tokio::spawn(forward);
        entry.insert(Forwarder {
            conn_id: conn_id.to_string(),
            task,
        });
    }

    /// Cancel a subscription if `conn_id` owns it.
    ///
    /// Returns whether a subscription was cancelled.
    pub fn unsubscribe(&self, conn_id: &str, subscription_id: &str) -> bool {
        let owned = self
            .forwarders
            .get(subscription_id)
            .is_some_and(|f| f.conn_id == conn_id);
        owned && self.cancel(subscription_id)
    }

    /// Forget a subscription whose forwarding task ended on its own.
    pub fn finish_subscription(&self, subscription_id: &str) {
        self.forwarders.remove(subscription_id);
    }

    fn cancel(&self, subscription_id: &str) -> bool {
        match self.forwarders.remove(subscription_id) {
            Some((_, forwarder)) => {
                forwarder.task.abort();
                tracing::debug!(subscription = %subscription_id, "Subscription cancelled");
                true
            }
            None => false,
        }
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        if let Some(conn) = self.connections.get(conn_id) {
            conn.sender.send(message).is_ok()
        } else {
            false
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of forwarded subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.forwarders.len()
    }
}
