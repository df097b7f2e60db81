//! Data model for the courier event-distribution service.
//!
//! This crate defines the entities shared between ingestion, the event
//! aggregator, and the delivery path:
//!
//! - [`Event`] - rows in the totally ordered event log
//! - [`Message`] - the envelopes that get confirmed
//! - [`Blocked`] - per-context FIFO head rows maintained by the aggregator
//! - [`StreamOffset`] - durable cursors over the event log
//! - [`EventFilter`] - the query shape stores understand
//!
//! Everything here is plain data: no I/O, no store coupling.

pub mod blocked;
pub mod event;
pub mod filter;
pub mod message;
pub mod offset;

/// Reserved namespace for system broadcast messages and service-owned rows.
pub const SYSTEM_NAMESPACE: &str = "courier_system";

/// Name of the aggregator's durable cursor over the event log.
pub const AGGREGATOR_OFFSET_NAME: &str = "ff-aggregator";

// Re-export key types for convenience
pub use blocked::{Blocked, BlockedUpdate};
pub use event::{Event, EventKind};
pub use filter::EventFilter;
pub use message::{ContextKey, Message, MessageRef, MessageUpdate};
pub use offset::{OffsetKind, StreamOffset};
