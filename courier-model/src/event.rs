//! Event log row types.
//!
//! Every persisted artifact produces an [`Event`] in the shared log. The
//! store assigns each row a strictly increasing `sequence` at insert time;
//! that ordering is the backbone of everything the aggregator does.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind discriminator for rows in the event log.
///
/// The set is closed. The aggregator reacts only to
/// [`EventKind::AGGREGATOR_INPUTS`]; every other kind passes through the
/// pipeline untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A data blob referenced by one or more messages is locally available.
    DataArrivedBroadcast,
    /// A message envelope has been committed and assigned its global sequence.
    MessageSequencedBroadcast,
    /// Every dependency of a message is satisfied and its context allowed it.
    MessageConfirmed,
    /// A confirmation moved a context head on to a successor message.
    MessagesUnblocked,
}

impl EventKind {
    /// Kinds the aggregator consumes.
    pub const AGGREGATOR_INPUTS: &[EventKind] = &[
        EventKind::DataArrivedBroadcast,
        EventKind::MessageSequencedBroadcast,
    ];

    /// Kinds the aggregator produces.
    ///
    /// Dispatch must ignore every kind in this set; reacting to our own
    /// output admits an infinite confirm/unblock loop.
    pub const AGGREGATOR_OUTPUTS: &[EventKind] = &[
        EventKind::MessageConfirmed,
        EventKind::MessagesUnblocked,
    ];

    /// Whether this kind is produced by the aggregator rather than ingestion.
    #[must_use]
    pub fn is_derived(&self) -> bool {
        Self::AGGREGATOR_OUTPUTS.contains(self)
    }
}

/// A row in the ordered event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Monotonic position in the log, assigned by the store at insert.
    pub sequence: i64,
    pub kind: EventKind,
    pub namespace: String,
    /// Message or data id, depending on `kind`.
    pub reference: Uuid,
    pub created: DateTime<Utc>,
}

impl Event {
    /// Build an event awaiting insertion; the store assigns `sequence`.
    #[must_use]
    pub fn new(kind: EventKind, namespace: impl Into<String>, reference: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            kind,
            namespace: namespace.into(),
            reference,
            created: Utc::now(),
        }
    }
}
