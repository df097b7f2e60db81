//! Message envelopes and their partial updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message envelope.
///
/// `sequence` mirrors the sequence of the message's own
/// `message-sequenced-broadcast` event and stays `None` until that envelope
/// has been committed. Locally originated messages sit in the store
/// unsequenced while their payloads upload, so a row existing does not imply
/// the envelope has been sequenced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub namespace: String,
    /// Opaque partition key. Messages sharing a context confirm in sequence
    /// order.
    pub context: String,
    pub group: Option<Uuid>,
    pub sequence: Option<i64>,
    /// Set exactly once, by the aggregator.
    pub confirmed: Option<DateTime<Utc>>,
    /// Ordered data blob dependencies.
    pub data_refs: Vec<Uuid>,
}

impl Message {
    /// Build an unsequenced, unconfirmed envelope.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        context: impl Into<String>,
        group: Option<Uuid>,
        data_refs: Vec<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.into(),
            context: context.into(),
            group,
            sequence: None,
            confirmed: None,
            data_refs,
        }
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed.is_some()
    }

    /// The uniqueness tuple this message serializes under.
    #[must_use]
    pub fn context_key(&self) -> ContextKey {
        ContextKey::new(self.namespace.clone(), self.context.clone(), self.group)
    }
}

/// Lightweight projection used for successor lookup inside a context.
///
/// Only sequenced messages appear in projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: Uuid,
    pub sequence: i64,
}

/// Partial update for a message row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub sequence: Option<i64>,
    pub confirmed: Option<DateTime<Utc>>,
}

impl MessageUpdate {
    /// Update that records the envelope's assigned sequence.
    #[must_use]
    pub fn sequenced(sequence: i64) -> Self {
        Self {
            sequence: Some(sequence),
            confirmed: None,
        }
    }

    /// Update that marks the message confirmed at `at`.
    #[must_use]
    pub fn confirmed(at: DateTime<Utc>) -> Self {
        Self {
            sequence: None,
            confirmed: Some(at),
        }
    }
}

/// The `(namespace, context, group)` tuple per-context serialization keys on.
///
/// A `None` group is its own equivalence class: it only matches `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextKey {
    pub namespace: String,
    pub context: String,
    pub group: Option<Uuid>,
}

impl ContextKey {
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        context: impl Into<String>,
        group: Option<Uuid>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            context: context.into(),
            group,
        }
    }
}
