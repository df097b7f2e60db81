//! In-memory Store implementation for testing and development.
//!
//! State lives behind a single `RwLock`; `run_as_group` takes a snapshot and
//! restores it when the group fails. The transactional scope assumes the
//! single-writer deployment the aggregator runs under (one instance per named
//! offset); it does not isolate concurrent groups.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use courier_model::{
    Blocked, BlockedUpdate, ContextKey, Event, EventFilter, Message, MessageRef, MessageUpdate,
    OffsetKind, StreamOffset,
};

use crate::error::{Result, StoreError};
use crate::traits::{GroupFuture, Store};

#[derive(Debug, Clone, Default)]
struct StoreState {
    /// Ascending by sequence; inserts append.
    events: Vec<Event>,
    last_sequence: i64,
    messages: HashMap<Uuid, Message>,
    /// Ids of locally available data blobs.
    data: HashSet<Uuid>,
    blocked: HashMap<ContextKey, Blocked>,
    offsets: HashMap<(OffsetKind, String, String), StreamOffset>,
}

/// In-memory implementation of [`Store`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a message row, replacing any previous row with the same id.
    pub async fn insert_message(&self, message: Message) {
        self.state.write().await.messages.insert(message.id, message);
    }

    /// Mark a data blob as locally available.
    pub async fn insert_data(&self, id: Uuid) {
        self.state.write().await.data.insert(id);
    }

    /// Snapshot of the event log, ascending by sequence.
    pub async fn events(&self) -> Vec<Event> {
        self.state.read().await.events.clone()
    }

    /// Snapshot of all message rows, ordered by id.
    pub async fn messages(&self) -> Vec<Message> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state.messages.values().cloned().collect();
        messages.sort_by_key(|m| m.id);
        messages
    }

    /// Snapshot of all blocker rows, ordered by id.
    pub async fn blocked_rows(&self) -> Vec<Blocked> {
        let state = self.state.read().await;
        let mut rows: Vec<Blocked> = state.blocked.values().cloned().collect();
        rows.sort_by_key(|b| b.id);
        rows
    }

    /// Number of events in the log.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let state = self.state.read().await;
        let mut events: Vec<Event> = state
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    async fn insert_event(&self, event: &Event, allow_existing: bool) -> Result<i64> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.events.iter().find(|e| e.id == event.id) {
            if allow_existing {
                return Ok(existing.sequence);
            }
            return Err(StoreError::Duplicate(event.id));
        }

        state.last_sequence += 1;
        let mut stored = event.clone();
        stored.sequence = state.last_sequence;
        state.events.push(stored);
        Ok(state.last_sequence)
    }

    async fn latest_event_sequence(&self) -> Result<i64> {
        Ok(self.state.read().await.last_sequence)
    }

    async fn get_message_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self.state.read().await.messages.get(&id).cloned())
    }

    async fn get_messages_for_data(&self, namespace: &str, data_id: Uuid) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| {
                m.namespace == namespace && !m.is_confirmed() && m.data_refs.contains(&data_id)
            })
            .cloned()
            .collect();
        // Unsequenced rows sort last; callers guard on the envelope anyway.
        messages.sort_by_key(|m| m.sequence.unwrap_or(i64::MAX));
        Ok(messages)
    }

    async fn get_message_refs(
        &self,
        key: &ContextKey,
        sequence_gt: Option<i64>,
        limit: usize,
    ) -> Result<Vec<MessageRef>> {
        let state = self.state.read().await;
        let mut refs: Vec<MessageRef> = state
            .messages
            .values()
            .filter(|m| !m.is_confirmed() && m.context_key() == *key)
            .filter_map(|m| m.sequence.map(|sequence| MessageRef { id: m.id, sequence }))
            .filter(|r| sequence_gt.is_none_or(|gt| r.sequence > gt))
            .collect();
        refs.sort_by_key(|r| r.sequence);
        refs.truncate(limit);
        Ok(refs)
    }

    async fn update_message(&self, id: Uuid, update: &MessageUpdate) -> Result<()> {
        let mut state = self.state.write().await;
        let message = state.messages.get_mut(&id).ok_or(StoreError::NotFound {
            kind: "message",
            id,
        })?;
        if let Some(sequence) = update.sequence {
            message.sequence = Some(sequence);
        }
        if let Some(confirmed) = update.confirmed {
            message.confirmed = Some(confirmed);
        }
        Ok(())
    }

    async fn check_data_available(&self, message: &Message) -> Result<bool> {
        let state = self.state.read().await;
        Ok(message.data_refs.iter().all(|d| state.data.contains(d)))
    }

    async fn get_blocked_by_context(&self, key: &ContextKey) -> Result<Option<Blocked>> {
        Ok(self.state.read().await.blocked.get(key).cloned())
    }

    async fn upsert_blocked(&self, blocked: &Blocked, allow_existing: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let key = blocked.context_key();
        if let Some(existing) = state.blocked.get(&key)
            && !allow_existing
        {
            return Err(StoreError::Duplicate(existing.id));
        }
        state.blocked.insert(key, blocked.clone());
        Ok(())
    }

    async fn update_blocked(&self, id: Uuid, update: &BlockedUpdate) -> Result<()> {
        let mut state = self.state.write().await;
        let blocked = state
            .blocked
            .values_mut()
            .find(|b| b.id == id)
            .ok_or(StoreError::NotFound {
                kind: "blocked",
                id,
            })?;
        if let Some(message) = update.message {
            blocked.message = message;
        }
        Ok(())
    }

    async fn delete_blocked(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let key = state
            .blocked
            .iter()
            .find(|(_, b)| b.id == id)
            .map(|(k, _)| k.clone())
            .ok_or(StoreError::NotFound {
                kind: "blocked",
                id,
            })?;
        state.blocked.remove(&key);
        Ok(())
    }

    async fn get_offset(
        &self,
        kind: OffsetKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StreamOffset>> {
        let key = (kind, namespace.to_string(), name.to_string());
        Ok(self.state.read().await.offsets.get(&key).cloned())
    }

    async fn upsert_offset(&self, offset: &StreamOffset) -> Result<()> {
        let key = (
            offset.kind,
            offset.namespace.clone(),
            offset.name.clone(),
        );
        self.state.write().await.offsets.insert(key, offset.clone());
        Ok(())
    }

    async fn run_as_group<'a>(&'a self, work: GroupFuture<'a>) -> Result<()> {
        // Snapshot outside the lock so the work future can take it.
        let snapshot = self.state.read().await.clone();
        match work.await {
            Ok(()) => Ok(()),
            Err(e) => {
                *self.state.write().await = snapshot;
                Err(e)
            }
        }
    }
}
