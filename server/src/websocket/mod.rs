//! WebSocket push subscriptions.
//!
//! Clients connect via WebSocket, subscribe to collection queries and receive
//! a full snapshot of each query whenever a write touches its collection.

mod manager;
mod protocol;

pub use manager::{Connection, ConnectionManager, MessageSender};
pub use protocol::*;
