//! Service wrapper: one aggregator instance per process and per named offset.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use courier_store::Store;

use crate::aggregator::{Aggregator, SystemMessageHandler};
use crate::config::AggregatorConfig;
use crate::notifier::EventNotifier;
use crate::poller::{EventPoller, OffsetIdentity};

/// Runs the aggregator pipeline as a background task.
///
/// Owns the shutdown token and the poller task; hands out the shared
/// [`EventNotifier`] so producers can cut the idle wait short after
/// inserting events.
pub struct AggregatorService {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
    notifier: Arc<EventNotifier>,
    failures: Arc<AtomicU32>,
}

impl AggregatorService {
    /// Start the aggregator over `store`.
    #[must_use]
    pub fn start(store: Arc<dyn Store>, config: AggregatorConfig) -> Self {
        Self::start_with_system_handler(store, config, None)
    }

    /// Start the aggregator with an optional system-broadcast hook.
    #[must_use]
    pub fn start_with_system_handler(
        store: Arc<dyn Store>,
        config: AggregatorConfig,
        system_handler: Option<Arc<dyn SystemMessageHandler>>,
    ) -> Self {
        let notifier = Arc::new(EventNotifier::new());

        let mut aggregator = Aggregator::new(Arc::clone(&store));
        if let Some(handler) = system_handler {
            aggregator = aggregator.with_system_handler(handler);
        }

        let poller = EventPoller::new(
            store,
            Arc::clone(&notifier),
            config,
            OffsetIdentity::aggregator(),
            Arc::new(aggregator),
        );
        let failures = poller.failure_counter();

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            info!("Event aggregator started");
            if let Err(e) = poller.run(token).await {
                error!(error = %e, "Event aggregator terminated");
            }
        });

        Self {
            handle,
            shutdown,
            notifier,
            failures,
        }
    }

    /// The wake channel producers signal after inserting events.
    #[must_use]
    pub fn notifier(&self) -> Arc<EventNotifier> {
        Arc::clone(&self.notifier)
    }

    /// Consecutive batch failures of the current batch; zero when healthy.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Signal the poller to stop.
    pub fn shutdown(&self) {
        info!("Signaling aggregator shutdown");
        self.shutdown.cancel();
    }

    /// Wait for the poller task to finish.
    pub async fn wait_for_shutdown(self) {
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Aggregator task panicked");
        }
        info!("Event aggregator stopped");
    }
}
