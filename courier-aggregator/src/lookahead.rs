//! Per-batch lookahead over upcoming events.
//!
//! Built fresh for every batch, the index answers one question: does a later
//! event in this batch mention the same message? The aggregator uses it to
//! let the later event drive a completion check instead of running it twice,
//! and to skip emitting an unblock for a successor the batch is about to
//! handle anyway. Skipping is safe precisely because the later event is
//! guaranteed to still be in the batch.

use std::collections::HashMap;

use uuid::Uuid;

use courier_model::{Event, EventKind};

/// Index from message reference to the batch events that mention it.
#[derive(Debug)]
pub struct LookaheadIndex {
    by_reference: HashMap<Uuid, Vec<(Uuid, EventKind)>>,
    reference_of: HashMap<Uuid, Uuid>,
}

impl LookaheadIndex {
    /// Index every event in the batch.
    #[must_use]
    pub fn build(events: &[Event]) -> Self {
        let mut by_reference: HashMap<Uuid, Vec<(Uuid, EventKind)>> = HashMap::new();
        let mut reference_of = HashMap::new();
        for event in events {
            by_reference
                .entry(event.reference)
                .or_default()
                .push((event.id, event.kind));
            reference_of.insert(event.id, event.reference);
        }
        Self {
            by_reference,
            reference_of,
        }
    }

    /// Drop the entry for `event_id`; returns whether it was present.
    ///
    /// Called for the in-hand event before dispatch, so queries only answer
    /// about upcoming events.
    pub fn remove(&mut self, event_id: Uuid) -> bool {
        let Some(reference) = self.reference_of.remove(&event_id) else {
            return false;
        };
        if let Some(entries) = self.by_reference.get_mut(&reference) {
            entries.retain(|(id, _)| *id != event_id);
            if entries.is_empty() {
                self.by_reference.remove(&reference);
            }
        }
        true
    }

    /// Whether any remaining event for `reference` has a kind in `kinds`.
    #[must_use]
    pub fn has_any_of(&self, reference: Uuid, kinds: &[EventKind]) -> bool {
        self.by_reference
            .get(&reference)
            .is_some_and(|entries| entries.iter().any(|(_, kind)| kinds.contains(kind)))
    }
}
