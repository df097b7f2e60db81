//! Durable cursors over the event log.

use serde::{Deserialize, Serialize};

/// Which pipeline a cursor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetKind {
    /// The event aggregator's single process-wide cursor.
    Aggregator,
    /// A delivery subscription's cursor.
    Subscription,
}

/// A named durable cursor.
///
/// `current` is the highest event sequence fully processed; readers resume
/// with strictly greater sequences. Each named offset has a single writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOffset {
    pub kind: OffsetKind,
    pub namespace: String,
    pub name: String,
    pub current: i64,
}

impl StreamOffset {
    #[must_use]
    pub fn new(
        kind: OffsetKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        current: i64,
    ) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
            current,
        }
    }
}
