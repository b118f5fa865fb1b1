//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names.
//! Embedded documents, queries and snapshots keep their camelCase form.

use parkspot_engine::{CollectionQuery, CollectionSnapshot};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a push subscription on a collection query.
    Subscribe {
        query: CollectionQuery,
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Cancel a subscription opened on this connection.
    Unsubscribe {
        subscription_id: String,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The subscription is open. Its snapshots follow.
    Subscribed {
        subscription_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Full result of a subscribed query.
    Snapshot {
        subscription_id: String,
        snapshot: CollectionSnapshot,
    },

    /// The subscription failed. No further snapshots follow.
    SubscriptionError {
        subscription_id: String,
        message: String,
    },

    /// Response to an unsubscribe.
    Unsubscribed {
        subscription_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
        /// Request ID from the original request (if applicable)
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }

    /// Create a snapshot push.
    pub fn snapshot(subscription_id: impl Into<String>, snapshot: CollectionSnapshot) -> Self {
        ServerMessage::Snapshot {
            subscription_id: subscription_id.into(),
            snapshot,
        }
    }
}
