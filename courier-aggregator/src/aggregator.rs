//! The aggregator core.
//!
//! Joins "data arrived" and "message sequenced" signals per message, enforces
//! per-context in-order confirmation through blocked-context rows, confirms
//! messages whose dependencies are all satisfied, and emits derived
//! `message-confirmed` / `messages-unblocked` events back into the log.
//!
//! One batch is one transactional group: every derived write and the offset
//! commit land atomically, and a failure rolls the whole batch back for the
//! poller to retry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, trace};

use courier_model::{
    AGGREGATOR_OFFSET_NAME, Blocked, BlockedUpdate, Event, EventFilter, EventKind, Message,
    MessageUpdate, OffsetKind, SYSTEM_NAMESPACE, StreamOffset,
};
use courier_store::Store;

use crate::error::Result;
use crate::lookahead::LookaheadIndex;
use crate::poller::BatchHandler;

/// Hook for messages in the reserved system namespace.
///
/// Invoked synchronously inside the batch transaction, before the message
/// confirms. Errors surface as transient store failures and make the poller
/// retry the batch, so implementations must be safe to re-run.
#[async_trait]
pub trait SystemMessageHandler: Send + Sync {
    async fn on_system_message(&self, message: &Message) -> courier_store::Result<()>;
}

/// Stateful batch processor over the event log.
///
/// All state lives in the store; the aggregator itself holds nothing between
/// batches, which is what makes verbatim batch retries safe.
pub struct Aggregator {
    store: Arc<dyn Store>,
    system_handler: Option<Arc<dyn SystemMessageHandler>>,
}

impl Aggregator {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            system_handler: None,
        }
    }

    /// Attach the system-broadcast hook.
    #[must_use]
    pub fn with_system_handler(mut self, handler: Arc<dyn SystemMessageHandler>) -> Self {
        self.system_handler = Some(handler);
        self
    }

    async fn process_batch(&self, events: &[Event]) -> courier_store::Result<bool> {
        let mut lookahead = LookaheadIndex::build(events);
        let mut repoll = false;

        for event in events {
            // Drop the in-hand event first so the index only answers about
            // upcoming ones.
            lookahead.remove(event.id);
            repoll |= self.process_event(event, &lookahead).await?;
        }

        if let Some(last) = events.last() {
            self.store
                .upsert_offset(&StreamOffset::new(
                    OffsetKind::Aggregator,
                    SYSTEM_NAMESPACE,
                    AGGREGATOR_OFFSET_NAME,
                    last.sequence,
                ))
                .await?;
        }
        Ok(repoll)
    }

    async fn process_event(
        &self,
        event: &Event,
        lookahead: &LookaheadIndex,
    ) -> courier_store::Result<bool> {
        if event.kind.is_derived() {
            // Our own output is inert; reacting to it would loop.
            trace!(sequence = event.sequence, kind = ?event.kind, "Skipping derived event");
            return Ok(false);
        }
        match event.kind {
            EventKind::DataArrivedBroadcast => self.process_data_arrived(event, lookahead).await,
            EventKind::MessageSequencedBroadcast => {
                let Some(message) = self.store.get_message_by_id(event.reference).await? else {
                    // Log and stores are eventually consistent; the row may
                    // simply not be here yet.
                    debug!(reference = %event.reference, "Sequenced event for unknown message");
                    return Ok(false);
                };
                if message.is_confirmed() {
                    return Ok(false);
                }
                self.check_message_complete(&message, event, lookahead).await
            }
            _ => Ok(false),
        }
    }

    /// A data blob became available: re-check every unconfirmed message that
    /// references it, unless a sequenced event later in the batch will do so.
    async fn process_data_arrived(
        &self,
        event: &Event,
        lookahead: &LookaheadIndex,
    ) -> courier_store::Result<bool> {
        let messages = self
            .store
            .get_messages_for_data(&event.namespace, event.reference)
            .await?;
        let mut repoll = false;
        for message in &messages {
            if lookahead.has_any_of(message.id, &[EventKind::MessageSequencedBroadcast]) {
                trace!(message = %message.id, "Sequenced event later in batch drives the check");
                continue;
            }
            repoll |= self.check_message_complete(message, event, lookahead).await?;
        }
        Ok(repoll)
    }

    /// Confirm `message` if it is complete and first in line for its context.
    ///
    /// Returns whether a repoll was requested.
    async fn check_message_complete(
        &self,
        message: &Message,
        event: &Event,
        lookahead: &LookaheadIndex,
    ) -> courier_store::Result<bool> {
        // Triggered by data arrival: the envelope may not be sequenced yet,
        // in which case the sequenced event retries this check later.
        if event.reference != message.id {
            let sequenced = self
                .store
                .get_events(
                    &EventFilter::new()
                        .with_reference(message.id)
                        .with_kinds([EventKind::MessageSequencedBroadcast])
                        .with_limit(1),
                )
                .await?;
            if sequenced.is_empty() {
                debug!(message = %message.id, "Envelope not sequenced yet");
                return Ok(false);
            }
        }
        let Some(sequence) = message.sequence else {
            debug!(message = %message.id, "Message row carries no sequence yet");
            return Ok(false);
        };

        let complete = self.store.check_data_available(message).await?;

        let blocker = self.check_update_context_blocked(message, complete).await?;
        if !complete {
            return Ok(false);
        }
        if let Some(blocked) = &blocker
            && blocked.message != message.id
        {
            trace!(message = %message.id, head = %blocked.message, "Context held by an earlier message");
            return Ok(false);
        }

        if message.namespace == SYSTEM_NAMESPACE
            && let Some(handler) = &self.system_handler
        {
            handler.on_system_message(message).await?;
        }

        self.store
            .update_message(message.id, &MessageUpdate::confirmed(Utc::now()))
            .await?;
        self.store
            .insert_event(
                &Event::new(
                    EventKind::MessageConfirmed,
                    message.namespace.as_str(),
                    message.id,
                ),
                false,
            )
            .await?;
        debug!(message = %message.id, sequence, "Message confirmed");

        // Pass the context head to the successor, if any.
        let mut repoll = false;
        if let Some(blocked) = blocker
            && blocked.message == message.id
        {
            let key = message.context_key();
            let successors = self.store.get_message_refs(&key, Some(sequence), 1).await?;
            match successors.first() {
                Some(next) => {
                    self.store
                        .update_blocked(blocked.id, &BlockedUpdate::message(next.id))
                        .await?;
                    if lookahead.has_any_of(
                        next.id,
                        &[
                            EventKind::MessageConfirmed,
                            EventKind::MessageSequencedBroadcast,
                        ],
                    ) {
                        trace!(successor = %next.id, "Batch already carries the successor's event");
                    } else {
                        self.store
                            .insert_event(
                                &Event::new(
                                    EventKind::MessagesUnblocked,
                                    message.namespace.as_str(),
                                    next.id,
                                ),
                                false,
                            )
                            .await?;
                        repoll = true;
                        debug!(successor = %next.id, "Successor unblocked");
                    }
                }
                None => {
                    self.store.delete_blocked(blocked.id).await?;
                    trace!(message = %message.id, "Context drained; blocker removed");
                }
            }
        }
        Ok(repoll)
    }

    /// Return the context's blocker, creating one when the context head is
    /// not ready to confirm.
    ///
    /// Existing rows come back unchanged; only the confirm path redirects or
    /// deletes them. A blocker is created eagerly so a later-sequenced,
    /// already-complete message can never overtake the head.
    async fn check_update_context_blocked(
        &self,
        message: &Message,
        complete: bool,
    ) -> courier_store::Result<Option<Blocked>> {
        let key = message.context_key();
        if let Some(existing) = self.store.get_blocked_by_context(&key).await? {
            return Ok(Some(existing));
        }

        // The head is the earliest unconfirmed sequenced message in the
        // context; the one under check is itself a candidate.
        let heads = self.store.get_message_refs(&key, None, 1).await?;
        let Some(head) = heads.first() else {
            return Ok(None);
        };
        if head.id == message.id && complete {
            return Ok(None);
        }

        let blocked = Blocked::new(&key, head.id);
        self.store.upsert_blocked(&blocked, false).await?;
        debug!(context = %key.context, head = %head.id, "Context blocked");
        Ok(Some(blocked))
    }
}

#[async_trait]
impl BatchHandler for Aggregator {
    async fn handle_batch(&self, events: &[Event]) -> Result<bool> {
        let repoll = AtomicBool::new(false);
        self.store
            .run_as_group(Box::pin(async {
                let requested = self.process_batch(events).await?;
                repoll.store(requested, Ordering::Relaxed);
                Ok(())
            }))
            .await?;
        Ok(repoll.load(Ordering::Relaxed))
    }
}
