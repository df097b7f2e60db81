//! Error types for the aggregator pipeline.

use thiserror::Error;

use courier_store::StoreError;

/// Top-level error type for the aggregator.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// A store operation failed; the poller retries the batch.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The durable offset could not be read or created at startup.
    #[error("Failed to initialize offset after {attempts} attempts: {source}")]
    Startup {
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

/// Result type alias for aggregator operations.
pub type Result<T> = std::result::Result<T, AggregatorError>;
