//! Request handlers for document reads, writes and subscriptions.

mod documents;
mod websocket;

pub use documents::*;
pub use websocket::*;
