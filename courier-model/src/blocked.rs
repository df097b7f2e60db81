//! Blocked-context rows.
//!
//! A [`Blocked`] row is the per-context FIFO head: at most one exists per
//! [`ContextKey`], and it names the earliest uncomplete message holding the
//! context closed. Rows are created, redirected, and deleted exclusively by
//! the aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::ContextKey;

/// The current blocker of a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocked {
    pub id: Uuid,
    pub namespace: String,
    pub context: String,
    pub group: Option<Uuid>,
    /// The message currently holding the context closed.
    pub message: Uuid,
    pub created: DateTime<Utc>,
}

impl Blocked {
    /// Build a blocker for `key`, naming `message` as the head.
    #[must_use]
    pub fn new(key: &ContextKey, message: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: key.namespace.clone(),
            context: key.context.clone(),
            group: key.group,
            message,
            created: Utc::now(),
        }
    }

    #[must_use]
    pub fn context_key(&self) -> ContextKey {
        ContextKey::new(self.namespace.clone(), self.context.clone(), self.group)
    }
}

/// Partial update for a blocker row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockedUpdate {
    pub message: Option<Uuid>,
}

impl BlockedUpdate {
    /// Update that redirects the blocker to a successor message.
    #[must_use]
    pub fn message(id: Uuid) -> Self {
        Self { message: Some(id) }
    }
}
