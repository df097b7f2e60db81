//! End-to-end aggregation scenarios over an in-memory store.
//!
//! Each test ingests messages, data and events the way external
//! collaborators do, then drives the real [`Aggregator`] batch by batch and
//! asserts on the post-commit store state:
//! - completion joins (data-arrived x message-sequenced)
//! - per-context in-order confirmation through blocker rows
//! - lookahead suppression of redundant checks and unblock events
//! - rollback, replay and derived-event inertness

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use courier_aggregator::{Aggregator, BatchHandler, SystemMessageHandler};
use courier_model::{
    AGGREGATOR_OFFSET_NAME, Blocked, Event, EventKind, Message, MessageUpdate, OffsetKind,
    SYSTEM_NAMESPACE,
};
use courier_store::{InMemoryStore, Store};

const NS: &str = "ns1";

fn setup() -> (Arc<InMemoryStore>, Aggregator) {
    let store = Arc::new(InMemoryStore::new());
    let aggregator = Aggregator::new(Arc::clone(&store) as Arc<dyn Store>);
    (store, aggregator)
}

async fn ingest_message(store: &InMemoryStore, context: &str, data_refs: Vec<Uuid>) -> Message {
    let message = Message::new(NS, context, None, data_refs);
    store.insert_message(message.clone()).await;
    message
}

/// Commit the envelope: insert its sequenced event and mirror the assigned
/// sequence onto the message row.
async fn sequence_message(store: &InMemoryStore, message: &Message) -> Event {
    let mut event = Event::new(
        EventKind::MessageSequencedBroadcast,
        message.namespace.as_str(),
        message.id,
    );
    event.sequence = store.insert_event(&event, false).await.unwrap();
    store
        .update_message(message.id, &MessageUpdate::sequenced(event.sequence))
        .await
        .unwrap();
    event
}

/// Make a blob available and record its arrival event.
async fn arrive_data(store: &InMemoryStore, data: Uuid) -> Event {
    store.insert_data(data).await;
    let mut event = Event::new(EventKind::DataArrivedBroadcast, NS, data);
    event.sequence = store.insert_event(&event, false).await.unwrap();
    event
}

async fn is_confirmed(store: &InMemoryStore, message: &Message) -> bool {
    store
        .get_message_by_id(message.id)
        .await
        .unwrap()
        .unwrap()
        .is_confirmed()
}

async fn derived_events(store: &InMemoryStore, kind: EventKind, reference: Uuid) -> usize {
    store
        .events()
        .await
        .iter()
        .filter(|e| e.kind == kind && e.reference == reference)
        .count()
}

async fn committed_offset(store: &InMemoryStore) -> Option<i64> {
    store
        .get_offset(OffsetKind::Aggregator, SYSTEM_NAMESPACE, AGGREGATOR_OFFSET_NAME)
        .await
        .unwrap()
        .map(|o| o.current)
}

#[tokio::test]
async fn dependency_free_message_confirms_immediately() {
    let (store, aggregator) = setup();
    let m1 = ingest_message(&store, "ctx-a", vec![]).await;
    let e1 = sequence_message(&store, &m1).await;

    let repoll = aggregator.handle_batch(&[e1.clone()]).await.unwrap();

    assert!(!repoll);
    assert!(is_confirmed(&store, &m1).await);
    assert_eq!(
        derived_events(&store, EventKind::MessageConfirmed, m1.id).await,
        1
    );
    assert!(store.blocked_rows().await.is_empty());
    assert_eq!(committed_offset(&store).await, Some(e1.sequence));
}

#[tokio::test]
async fn data_before_envelope_waits_for_sequencing() {
    let (store, aggregator) = setup();
    let d1 = Uuid::new_v4();
    let m1 = ingest_message(&store, "ctx-a", vec![d1]).await;

    // The blob lands before the envelope is sequenced
    let e1 = arrive_data(&store, d1).await;
    aggregator.handle_batch(&[e1.clone()]).await.unwrap();

    assert!(!is_confirmed(&store, &m1).await);
    assert!(store.blocked_rows().await.is_empty());
    assert_eq!(committed_offset(&store).await, Some(e1.sequence));

    // The sequenced event arrives later and completes the join
    let e2 = sequence_message(&store, &m1).await;
    aggregator.handle_batch(&[e2.clone()]).await.unwrap();

    assert!(is_confirmed(&store, &m1).await);
    assert_eq!(
        derived_events(&store, EventKind::MessageConfirmed, m1.id).await,
        1
    );
    assert_eq!(committed_offset(&store).await, Some(e2.sequence));
}

#[tokio::test]
async fn lookahead_lets_the_sequenced_event_drive_the_check() {
    let (store, aggregator) = setup();
    let d1 = Uuid::new_v4();
    let m1 = ingest_message(&store, "ctx-a", vec![d1]).await;

    let e1 = arrive_data(&store, d1).await;
    let e2 = sequence_message(&store, &m1).await;

    // Both signals in one batch: the arrival defers to the sequenced event
    aggregator.handle_batch(&[e1, e2]).await.unwrap();

    assert!(is_confirmed(&store, &m1).await);
    assert_eq!(
        derived_events(&store, EventKind::MessageConfirmed, m1.id).await,
        1
    );
}

#[tokio::test]
async fn later_message_completing_first_blocks_on_the_head() {
    let (store, aggregator) = setup();
    let d1 = Uuid::new_v4();
    let d2 = Uuid::new_v4();
    let m1 = ingest_message(&store, "ctx-a", vec![d1]).await;
    let m2 = ingest_message(&store, "ctx-a", vec![d2]).await;
    sequence_message(&store, &m1).await;
    sequence_message(&store, &m2).await;

    // Only the later message's data is in; its check must not overtake the
    // earlier head (the sequenced events sit below this poller's offset)
    let e3 = arrive_data(&store, d2).await;
    aggregator.handle_batch(&[e3]).await.unwrap();

    assert!(!is_confirmed(&store, &m2).await);
    let blockers = store.blocked_rows().await;
    assert_eq!(blockers.len(), 1);
    assert_eq!(blockers[0].message, m1.id);
}

#[tokio::test]
async fn confirming_the_head_unblocks_the_successor() {
    let (store, aggregator) = setup();
    let d1 = Uuid::new_v4();
    let d2 = Uuid::new_v4();
    let m1 = ingest_message(&store, "ctx-a", vec![d1]).await;
    let m2 = ingest_message(&store, "ctx-a", vec![d2]).await;
    let e1 = sequence_message(&store, &m1).await;
    sequence_message(&store, &m2).await;
    store.insert_data(d1).await;
    store.insert_data(d2).await;

    // The context is already blocked on the head
    store
        .upsert_blocked(&Blocked::new(&m1.context_key(), m1.id), false)
        .await
        .unwrap();

    let repoll = aggregator.handle_batch(&[e1]).await.unwrap();

    assert!(repoll, "an unblock emission requests an immediate repoll");
    assert!(is_confirmed(&store, &m1).await);
    assert!(!is_confirmed(&store, &m2).await);

    let blockers = store.blocked_rows().await;
    assert_eq!(blockers.len(), 1);
    assert_eq!(blockers[0].message, m2.id);
    assert_eq!(
        derived_events(&store, EventKind::MessagesUnblocked, m2.id).await,
        1
    );
}

#[tokio::test]
async fn same_batch_successor_suppresses_the_unblock_event() {
    let (store, aggregator) = setup();
    let d1 = Uuid::new_v4();
    let d2 = Uuid::new_v4();
    let m1 = ingest_message(&store, "ctx-a", vec![d1]).await;
    let m2 = ingest_message(&store, "ctx-a", vec![d2]).await;
    let e1 = sequence_message(&store, &m1).await;
    let e2 = sequence_message(&store, &m2).await;
    store.insert_data(d1).await;
    store.insert_data(d2).await;

    store
        .upsert_blocked(&Blocked::new(&m1.context_key(), m1.id), false)
        .await
        .unwrap();

    // The successor's own sequenced event is already in the batch, so no
    // unblock event is needed and both confirm in order
    let repoll = aggregator.handle_batch(&[e1, e2]).await.unwrap();

    assert!(!repoll);
    assert!(is_confirmed(&store, &m1).await);
    assert!(is_confirmed(&store, &m2).await);
    assert_eq!(
        derived_events(&store, EventKind::MessagesUnblocked, m2.id).await,
        0
    );
    assert!(store.blocked_rows().await.is_empty());
}

#[tokio::test]
async fn unblock_when_the_heads_data_arrives() {
    let (store, aggregator) = setup();
    let d1 = Uuid::new_v4();
    let d2 = Uuid::new_v4();
    let m1 = ingest_message(&store, "ctx-a", vec![d1]).await;
    let m2 = ingest_message(&store, "ctx-a", vec![d2]).await;
    sequence_message(&store, &m1).await;
    sequence_message(&store, &m2).await;

    // Later message completes first and blocks on the head
    let e3 = arrive_data(&store, d2).await;
    aggregator.handle_batch(&[e3]).await.unwrap();
    assert_eq!(store.blocked_rows().await[0].message, m1.id);

    // The head's data lands: confirm it and hand the context to m2
    let e4 = arrive_data(&store, d1).await;
    let repoll = aggregator.handle_batch(&[e4]).await.unwrap();

    assert!(repoll);
    assert!(is_confirmed(&store, &m1).await);
    assert!(!is_confirmed(&store, &m2).await);
    assert_eq!(store.blocked_rows().await[0].message, m2.id);
    assert_eq!(
        derived_events(&store, EventKind::MessagesUnblocked, m2.id).await,
        1
    );
}

#[tokio::test]
async fn contexts_are_independent() {
    let (store, aggregator) = setup();
    let da = Uuid::new_v4();
    let db = Uuid::new_v4();
    let ma = ingest_message(&store, "ctx-a", vec![da]).await;
    let mb = ingest_message(&store, "ctx-b", vec![db]).await;
    let e1 = sequence_message(&store, &ma).await;
    let e2 = sequence_message(&store, &mb).await;
    let e3 = arrive_data(&store, db).await;
    let e4 = arrive_data(&store, da).await;

    aggregator.handle_batch(&[e1, e2, e3, e4]).await.unwrap();

    assert!(is_confirmed(&store, &ma).await);
    assert!(is_confirmed(&store, &mb).await);
    assert!(store.blocked_rows().await.is_empty());
}

#[tokio::test]
async fn per_context_confirmation_follows_sequence_order() {
    let (store, aggregator) = setup();
    let d1 = Uuid::new_v4();
    let d2 = Uuid::new_v4();
    let d3 = Uuid::new_v4();
    let m1 = ingest_message(&store, "ctx-a", vec![d1]).await;
    let m2 = ingest_message(&store, "ctx-a", vec![d2]).await;
    let m3 = ingest_message(&store, "ctx-a", vec![d3]).await;
    sequence_message(&store, &m1).await;
    sequence_message(&store, &m2).await;
    sequence_message(&store, &m3).await;

    // Data lands in reverse order; nothing may confirm before the head
    let e4 = arrive_data(&store, d3).await;
    aggregator.handle_batch(&[e4]).await.unwrap();
    let e5 = arrive_data(&store, d2).await;
    aggregator.handle_batch(&[e5]).await.unwrap();

    assert!(!is_confirmed(&store, &m1).await);
    assert!(!is_confirmed(&store, &m2).await);
    assert!(!is_confirmed(&store, &m3).await);
    let blockers = store.blocked_rows().await;
    assert_eq!(blockers.len(), 1);
    assert_eq!(blockers[0].message, m1.id);

    // Head data lands: m1 confirms, context passes to m2
    let e6 = arrive_data(&store, d1).await;
    aggregator.handle_batch(&[e6]).await.unwrap();
    assert!(is_confirmed(&store, &m1).await);
    assert!(!is_confirmed(&store, &m2).await);
    assert_eq!(store.blocked_rows().await[0].message, m2.id);

    // A rebroadcast of m2's data re-triggers its check in order
    let e7 = arrive_data(&store, d2).await;
    aggregator.handle_batch(&[e7]).await.unwrap();
    assert!(is_confirmed(&store, &m2).await);
    assert!(!is_confirmed(&store, &m3).await);
    assert_eq!(store.blocked_rows().await[0].message, m3.id);

    // Confirmation timestamps exist exactly for the confirmed prefix
    assert_eq!(
        derived_events(&store, EventKind::MessageConfirmed, m1.id).await,
        1
    );
    assert_eq!(
        derived_events(&store, EventKind::MessageConfirmed, m2.id).await,
        1
    );
    assert_eq!(
        derived_events(&store, EventKind::MessageConfirmed, m3.id).await,
        0
    );
}

#[tokio::test]
async fn a_context_never_holds_more_than_one_blocker() {
    let (store, aggregator) = setup();
    let d1 = Uuid::new_v4();
    let d2 = Uuid::new_v4();
    let m1 = ingest_message(&store, "ctx-a", vec![d1]).await;
    let m2 = ingest_message(&store, "ctx-a", vec![d2]).await;
    sequence_message(&store, &m1).await;
    sequence_message(&store, &m2).await;

    let e3 = arrive_data(&store, d2).await;
    aggregator.handle_batch(&[e3]).await.unwrap();

    // A rebroadcast runs the same gated check again
    let e4 = arrive_data(&store, d2).await;
    aggregator.handle_batch(&[e4]).await.unwrap();

    let blockers = store.blocked_rows().await;
    assert_eq!(blockers.len(), 1);
    assert_eq!(blockers[0].message, m1.id);
    assert!(!is_confirmed(&store, &m2).await);
}

#[tokio::test]
async fn empty_batch_writes_nothing() {
    let (store, aggregator) = setup();

    let repoll = aggregator.handle_batch(&[]).await.unwrap();

    assert!(!repoll);
    assert_eq!(store.event_count().await, 0);
    assert_eq!(committed_offset(&store).await, None);
}

#[tokio::test]
async fn derived_only_batch_commits_only_the_offset() {
    let (store, aggregator) = setup();
    let m1 = ingest_message(&store, "ctx-a", vec![]).await;
    sequence_message(&store, &m1).await;

    // Derived events naming a message that would otherwise confirm
    let mut confirmed_event = Event::new(EventKind::MessageConfirmed, NS, m1.id);
    confirmed_event.sequence = store.insert_event(&confirmed_event, false).await.unwrap();
    let mut unblocked_event = Event::new(EventKind::MessagesUnblocked, NS, m1.id);
    unblocked_event.sequence = store.insert_event(&unblocked_event, false).await.unwrap();

    let events_before = store.event_count().await;
    let repoll = aggregator
        .handle_batch(&[confirmed_event, unblocked_event.clone()])
        .await
        .unwrap();

    assert!(!repoll);
    assert!(!is_confirmed(&store, &m1).await);
    assert_eq!(store.event_count().await, events_before);
    assert!(store.blocked_rows().await.is_empty());
    assert_eq!(committed_offset(&store).await, Some(unblocked_event.sequence));
}

#[tokio::test]
async fn feeding_the_aggregator_its_own_output_is_a_fixpoint() {
    let (store, aggregator) = setup();
    let m1 = ingest_message(&store, "ctx-a", vec![]).await;
    let e1 = sequence_message(&store, &m1).await;
    aggregator.handle_batch(&[e1]).await.unwrap();

    // Replay every derived event the aggregator just produced
    let derived: Vec<Event> = store
        .events()
        .await
        .into_iter()
        .filter(|e| e.kind.is_derived())
        .collect();
    assert!(!derived.is_empty());

    let events_before = store.event_count().await;
    aggregator.handle_batch(&derived).await.unwrap();

    assert_eq!(store.event_count().await, events_before);
}

struct FailingOnce(AtomicU32);

#[async_trait]
impl SystemMessageHandler for FailingOnce {
    async fn on_system_message(&self, _message: &Message) -> courier_store::Result<()> {
        if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(courier_store::StoreError::Unavailable(
                "system handler not ready".to_string(),
            ));
        }
        Ok(())
    }
}

#[tokio::test]
async fn replaying_a_rolled_back_batch_reproduces_the_same_state() {
    let store = Arc::new(InMemoryStore::new());
    let aggregator = Aggregator::new(Arc::clone(&store) as Arc<dyn Store>)
        .with_system_handler(Arc::new(FailingOnce(AtomicU32::new(0))));

    let message = Message::new(SYSTEM_NAMESPACE, "ctx-sys", None, vec![]);
    store.insert_message(message.clone()).await;
    let mut e1 = Event::new(
        EventKind::MessageSequencedBroadcast,
        SYSTEM_NAMESPACE,
        message.id,
    );
    e1.sequence = store.insert_event(&e1, false).await.unwrap();
    store
        .update_message(message.id, &MessageUpdate::sequenced(e1.sequence))
        .await
        .unwrap();

    // First attempt fails inside the group and rolls everything back
    let err = aggregator.handle_batch(&[e1.clone()]).await;
    assert!(err.is_err());
    assert!(!is_confirmed(&store, &message).await);
    assert_eq!(store.event_count().await, 1);
    assert_eq!(committed_offset(&store).await, None);

    // The verbatim retry commits the full batch
    aggregator.handle_batch(&[e1.clone()]).await.unwrap();
    assert!(is_confirmed(&store, &message).await);
    assert_eq!(
        derived_events(&store, EventKind::MessageConfirmed, message.id).await,
        1
    );
    assert_eq!(committed_offset(&store).await, Some(e1.sequence));
}

#[tokio::test]
async fn system_handler_is_skipped_outside_the_system_namespace() {
    struct Counting(AtomicU32);

    #[async_trait]
    impl SystemMessageHandler for Counting {
        async fn on_system_message(&self, _message: &Message) -> courier_store::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let store = Arc::new(InMemoryStore::new());
    let counting = Arc::new(Counting(AtomicU32::new(0)));
    let aggregator = Aggregator::new(Arc::clone(&store) as Arc<dyn Store>)
        .with_system_handler(Arc::clone(&counting) as Arc<dyn SystemMessageHandler>);

    let m1 = ingest_message(&store, "ctx-a", vec![]).await;
    let e1 = sequence_message(&store, &m1).await;
    aggregator.handle_batch(&[e1]).await.unwrap();

    assert!(is_confirmed(&store, &m1).await);
    assert_eq!(counting.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn the_committed_offset_never_regresses() {
    let (store, aggregator) = setup();
    let m1 = ingest_message(&store, "ctx-a", vec![]).await;
    let e1 = sequence_message(&store, &m1).await;
    aggregator.handle_batch(&[e1.clone()]).await.unwrap();
    let first = committed_offset(&store).await.unwrap();
    assert_eq!(first, e1.sequence);

    let m2 = ingest_message(&store, "ctx-b", vec![]).await;
    let e2 = sequence_message(&store, &m2).await;
    aggregator.handle_batch(&[e2]).await.unwrap();
    let second = committed_offset(&store).await.unwrap();

    assert!(second > first);
}
