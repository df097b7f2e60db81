//! Query filters the store understands.

use uuid::Uuid;

use crate::event::{Event, EventKind};

/// Filter over the event log.
///
/// Every present field must match; results are always ordered by ascending
/// sequence. `limit` bounds the result set and is applied by the store after
/// matching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub namespace: Option<String>,
    pub kinds: Option<Vec<EventKind>>,
    pub reference: Option<Uuid>,
    pub sequence_gt: Option<i64>,
    pub limit: Option<usize>,
}

impl EventFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn with_kinds(mut self, kinds: impl Into<Vec<EventKind>>) -> Self {
        self.kinds = Some(kinds.into());
        self
    }

    #[must_use]
    pub fn with_reference(mut self, reference: Uuid) -> Self {
        self.reference = Some(reference);
        self
    }

    #[must_use]
    pub fn with_sequence_gt(mut self, sequence: i64) -> Self {
        self.sequence_gt = Some(sequence);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` satisfies every present field except `limit`.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ns) = &self.namespace
            && event.namespace != *ns
        {
            return false;
        }
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }
        if let Some(reference) = self.reference
            && event.reference != reference
        {
            return false;
        }
        if let Some(sequence) = self.sequence_gt
            && event.sequence <= sequence
        {
            return false;
        }
        true
    }
}
