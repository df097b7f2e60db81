//! The persistence surface the aggregator requires.
//!
//! One trait covers everything: the aggregator holds an `Arc<dyn Store>` and
//! never learns which backend is behind it. All multi-row queries return
//! results in ascending sequence order.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use uuid::Uuid;

use courier_model::{
    Blocked, BlockedUpdate, ContextKey, Event, EventFilter, Message, MessageRef, MessageUpdate,
    OffsetKind, StreamOffset,
};

use crate::error::Result;

/// Work executed inside one transactional group.
///
/// The future is built by the caller, borrows whatever it needs (including
/// the store itself), and is driven to completion inside the group.
pub type GroupFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Durable storage for messages, data, events, blocked contexts and offsets.
#[async_trait]
pub trait Store: Send + Sync {
    /// Ordered query over the event log.
    async fn get_events(&self, filter: &EventFilter) -> Result<Vec<Event>>;

    /// Insert an event, assigning the next monotonic sequence.
    ///
    /// Returns the assigned sequence. With `allow_existing = true` an id
    /// collision returns the existing row's sequence instead of failing.
    async fn insert_event(&self, event: &Event, allow_existing: bool) -> Result<i64>;

    /// The highest sequence in the event log, or 0 when the log is empty.
    async fn latest_event_sequence(&self) -> Result<i64>;

    /// Fetch a message by id, or `None`.
    async fn get_message_by_id(&self, id: Uuid) -> Result<Option<Message>>;

    /// Unconfirmed messages in `namespace` whose data refs include `data_id`,
    /// ascending by sequence.
    async fn get_messages_for_data(&self, namespace: &str, data_id: Uuid) -> Result<Vec<Message>>;

    /// Successor projection: unconfirmed, sequenced messages in `key` with
    /// sequence strictly greater than `sequence_gt` (when present),
    /// ascending, at most `limit` rows.
    async fn get_message_refs(
        &self,
        key: &ContextKey,
        sequence_gt: Option<i64>,
        limit: usize,
    ) -> Result<Vec<MessageRef>>;

    /// Partial update of a message row.
    async fn update_message(&self, id: Uuid, update: &MessageUpdate) -> Result<()>;

    /// Whether every data blob `message` references is locally available.
    ///
    /// Errors only on persistence failure, never on absence.
    async fn check_data_available(&self, message: &Message) -> Result<bool>;

    /// The current blocker of a context, or `None`.
    async fn get_blocked_by_context(&self, key: &ContextKey) -> Result<Option<Blocked>>;

    /// Insert-or-update a blocker. With `allow_existing = false` an existing
    /// row under the same context key fails with
    /// [`StoreError::Duplicate`](crate::StoreError::Duplicate).
    async fn upsert_blocked(&self, blocked: &Blocked, allow_existing: bool) -> Result<()>;

    /// Partial update of a blocker row.
    async fn update_blocked(&self, id: Uuid, update: &BlockedUpdate) -> Result<()>;

    /// Remove a blocker row.
    async fn delete_blocked(&self, id: Uuid) -> Result<()>;

    /// Fetch a durable cursor, or `None`.
    async fn get_offset(
        &self,
        kind: OffsetKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StreamOffset>>;

    /// Insert-or-update a durable cursor, keyed by `(kind, namespace, name)`.
    async fn upsert_offset(&self, offset: &StreamOffset) -> Result<()>;

    /// Execute `work` inside a single transactional group.
    ///
    /// Every store write performed while the future runs commits atomically
    /// with it; an `Err` rolls all of them back and is returned to the
    /// caller.
    async fn run_as_group<'a>(&'a self, work: GroupFuture<'a>) -> Result<()>;
}
