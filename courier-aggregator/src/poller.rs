//! Durable-offset batch polling over the event log.
//!
//! The poller owns the read side of the pipeline: it resumes from a durable
//! cursor, fetches bounded batches in ascending sequence order, hands each
//! batch to a [`BatchHandler`], and retries failed batches verbatim with
//! capped exponential backoff. The handler commits the durable offset inside
//! its own transactional group; the poller advances only its in-memory
//! cursor afterwards, so a crash replays at most one batch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use courier_model::{
    AGGREGATOR_OFFSET_NAME, Event, EventFilter, OffsetKind, SYSTEM_NAMESPACE, StreamOffset,
};
use courier_store::{Store, StoreError};

use crate::config::{AggregatorConfig, FirstEvent};
use crate::error::{AggregatorError, Result};
use crate::notifier::EventNotifier;

/// Processes one polled batch.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// Handle `events`, committing the durable offset within the same
    /// transactional group as any derived writes.
    ///
    /// Returns `true` to request an immediate repoll. An error makes the
    /// poller retry the exact same batch after a backoff.
    async fn handle_batch(&self, events: &[Event]) -> Result<bool>;
}

/// Identity of the durable cursor a poller resumes from.
#[derive(Debug, Clone)]
pub struct OffsetIdentity {
    pub kind: OffsetKind,
    pub namespace: String,
    pub name: String,
}

impl OffsetIdentity {
    /// The aggregator's process-wide cursor.
    #[must_use]
    pub fn aggregator() -> Self {
        Self {
            kind: OffsetKind::Aggregator,
            namespace: SYSTEM_NAMESPACE.to_string(),
            name: AGGREGATOR_OFFSET_NAME.to_string(),
        }
    }
}

/// Single-consumer polling loop over the event log.
///
/// Exactly one poller runs per named offset; concurrent pollers sharing a
/// name are undefined and must be prevented by deployment.
pub struct EventPoller {
    store: Arc<dyn Store>,
    notifier: Arc<EventNotifier>,
    config: AggregatorConfig,
    offset: OffsetIdentity,
    handler: Arc<dyn BatchHandler>,
    consecutive_failures: Arc<AtomicU32>,
}

impl EventPoller {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<EventNotifier>,
        config: AggregatorConfig,
        offset: OffsetIdentity,
        handler: Arc<dyn BatchHandler>,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
            offset,
            handler,
            consecutive_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Shared counter of consecutive batch failures; resets to zero when a
    /// batch is handled successfully.
    #[must_use]
    pub fn failure_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.consecutive_failures)
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Returns an error only when the durable offset cannot be initialized
    /// within the configured startup attempts.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Some(mut cursor) = self.init_offset(&shutdown).await? else {
            return Ok(());
        };
        info!(name = %self.offset.name, cursor, "Event poller started");

        // Whether the next fetch begins a new idle period; only such fetches
        // are eligible for the coalescing wait.
        let mut fresh = true;

        while !shutdown.is_cancelled() {
            let filter = EventFilter::new()
                .with_sequence_gt(cursor)
                .with_limit(self.config.batch_size);

            let mut batch = match self.store.get_events(&filter).await {
                Ok(batch) => batch,
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    let delay = self.config.retry.delay_for(failures.saturating_sub(1));
                    warn!(error = %e, failures, ?delay, "Event fetch failed; backing off");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                fresh = true;
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    woken = self.notifier.idle_wait(self.config.poll_timeout) => {
                        if woken {
                            trace!("Woken by notifier");
                        }
                    }
                }
                continue;
            }

            if fresh
                && batch.len() < self.config.batch_size
                && let Some(wait) = self.config.batch_timeout
            {
                trace!(count = batch.len(), "Short fresh batch; waiting for more rows");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                match self.store.get_events(&filter).await {
                    Ok(refetched) if refetched.len() > batch.len() => batch = refetched,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Coalescing refetch failed; keeping original batch");
                    }
                }
            }

            debug!(count = batch.len(), first = batch[0].sequence, "Handling batch");
            let Some(repoll) = self.handle_with_retry(&batch, &shutdown).await else {
                break;
            };

            if let Some(last) = batch.last() {
                cursor = last.sequence;
            }
            fresh = false;
            if repoll {
                trace!("Repoll requested; polling again without waiting");
            }
        }

        info!(name = %self.offset.name, "Event poller stopped");
        Ok(())
    }

    /// Invoke the handler, retrying the same batch until it succeeds or the
    /// poller is cancelled. Returns `None` on cancellation.
    async fn handle_with_retry(
        &self,
        batch: &[Event],
        shutdown: &CancellationToken,
    ) -> Option<bool> {
        let mut attempt: u32 = 0;
        loop {
            if shutdown.is_cancelled() {
                return None;
            }
            match self.handler.handle_batch(batch).await {
                Ok(repoll) => {
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "Batch handled after retries");
                    }
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    return Some(repoll);
                }
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    let delay = self.config.retry.delay_for(attempt);
                    error!(error = %e, failures, ?delay, "Batch handling failed; retrying same batch");
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = shutdown.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Read or create the durable offset, with bounded retries.
    ///
    /// Returns `Ok(None)` when cancelled before the offset existed.
    async fn init_offset(&self, shutdown: &CancellationToken) -> Result<Option<i64>> {
        let mut attempt: u32 = 0;
        loop {
            match self.load_or_create_offset().await {
                Ok(cursor) => return Ok(Some(cursor)),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.startup_attempts {
                        error!(error = %e, attempts = attempt, "Giving up on offset initialization");
                        return Err(AggregatorError::Startup {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    let delay = self.config.retry.delay_for(attempt - 1);
                    warn!(error = %e, attempt, ?delay, "Offset initialization failed; retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn load_or_create_offset(&self) -> std::result::Result<i64, StoreError> {
        if let Some(offset) = self
            .store
            .get_offset(self.offset.kind, &self.offset.namespace, &self.offset.name)
            .await?
        {
            debug!(name = %self.offset.name, current = offset.current, "Resuming from durable offset");
            return Ok(offset.current);
        }

        let current = match self.config.first_event {
            FirstEvent::Oldest => 0,
            FirstEvent::Newest => self.store.latest_event_sequence().await?,
            // The cursor is exclusive, so n itself is the first event delivered
            FirstEvent::Sequence(n) => n - 1,
        };
        self.store
            .upsert_offset(&StreamOffset::new(
                self.offset.kind,
                self.offset.namespace.clone(),
                self.offset.name.clone(),
                current,
            ))
            .await?;
        info!(name = %self.offset.name, current, "Created durable offset");
        Ok(current)
    }
}
