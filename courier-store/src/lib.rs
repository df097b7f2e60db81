//! Persistence interface for the courier event aggregator.
//!
//! The aggregator speaks to persistence exclusively through the [`Store`]
//! trait: ordered event-log queries and inserts, message lookups and partial
//! updates, blocked-context rows, durable offsets, and a transactional group
//! wrapper. Backends implement the trait; everything above it stays
//! backend-agnostic.
//!
//! # Key Types
//!
//! - [`Store`] - the full persistence surface the aggregator requires
//! - [`InMemoryStore`] - reference implementation for tests and development
//! - [`StoreError`] - error classes; [`StoreError::Unavailable`] is the
//!   transient, retryable one

pub mod error;
pub mod memory;
pub mod traits;

// Re-exports
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use traits::{GroupFuture, Store};
