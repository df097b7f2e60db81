//! Event aggregator for the courier event-distribution service.
//!
//! The aggregator consumes the persisted, monotonically sequenced event log,
//! correlates data-arrival and message-sequenced events by the message they
//! refer to, enforces per-context in-order confirmation through
//! blocked-context rows, and emits derived confirmation and unblock events
//! back into the same log.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Event log                          │
//! │  [data-arrived][message-sequenced][message-confirmed]... │
//! └──────────────┬───────────────────────────▲───────────────┘
//!                │ poll (offset)             │ derived events
//!        ┌───────▼────────┐          ┌───────┴────────┐
//!        │  EventPoller   │─ batch ─▶│   Aggregator   │
//!        │ retry/backoff  │          │ join + ordering│
//!        └───────▲────────┘          └────────────────┘
//!                │ wake
//!        ┌───────┴────────┐
//!        │ EventNotifier  │◀─ producers
//!        └────────────────┘
//! ```
//!
//! Each batch runs inside one transactional store group: derived events,
//! confirmations, blocker changes and the offset commit land atomically, so
//! a failed batch rolls back cleanly and is retried verbatim.
//!
//! # Key Types
//!
//! - [`AggregatorService`] - spawns and supervises the pipeline
//! - [`Aggregator`] - the per-batch state machine
//! - [`EventPoller`] / [`BatchHandler`] - offset-committed batch polling
//! - [`EventNotifier`] - coalescing wake channel for producers
//! - [`AggregatorConfig`] - batch, timeout, retry and startup settings

pub mod aggregator;
pub mod config;
pub mod error;
pub mod lookahead;
pub mod notifier;
pub mod poller;
pub mod service;

// Re-exports
pub use aggregator::{Aggregator, SystemMessageHandler};
pub use config::{AggregatorConfig, FirstEvent, RetryConfig};
pub use error::{AggregatorError, Result};
pub use lookahead::LookaheadIndex;
pub use notifier::EventNotifier;
pub use poller::{BatchHandler, EventPoller, OffsetIdentity};
pub use service::AggregatorService;
