//! Error types for store operations.

use thiserror::Error;
use uuid::Uuid;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Insert with `allow_existing = false` hit an existing id.
    #[error("Record already exists: {0}")]
    Duplicate(Uuid),

    /// Update or delete targeted a row that is not there.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    /// Transient persistence failure; callers retry with backoff.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
