//! Error types for store access.

use parkspot_engine::DocumentRef;

/// Errors reported by a [`DocumentStore`](crate::DocumentStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(DocumentRef),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("subscription closed")]
    Closed,
}

impl StoreError {
    /// Whether the error means the target document does not exist yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Result type alias for store calls.
pub type Result<T> = std::result::Result<T, StoreError>;
