//! Error types for the Parkspot engine.

use crate::DocumentId;
use thiserror::Error;

/// All possible errors from the Parkspot engine.
///
/// These are surfaced to presentation code as state (`ListState::error`,
/// `ToggleState::error`), so they are cheap to clone and compare.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Component boundary errors
    #[error("no authenticated principal")]
    Unauthenticated,

    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("mutation failed: {0}")]
    MutationFailed(String),

    // Data errors
    #[error("duplicate document in snapshot: {0}")]
    DuplicateDocument(DocumentId),

    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

impl Error {
    /// Whether the failure can be recovered from by an explicit refresh.
    pub fn is_subscription_failure(&self) -> bool {
        matches!(self, Error::SubscriptionFailed(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
