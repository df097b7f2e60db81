//! Wake-up channel between event producers and the poller.

use std::time::Duration;

use tokio::sync::Notify;

/// A coalescing one-slot wake signal.
///
/// Producers call [`wake`](EventNotifier::wake) after inserting events so an
/// idle poller cuts its wait short. At most one wake is held while nobody
/// waits; waking again is a no-op, and the poller consumes at most one wake
/// per idle wait. Losing a wake never loses events; the next poll still sees
/// the new rows. The notifier affects latency only, never correctness.
#[derive(Debug, Default)]
pub struct EventNotifier {
    notify: Notify,
}

impl EventNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that new events were inserted.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Wait until woken or until `timeout` elapses.
    ///
    /// Returns `true` when a wake was consumed, `false` on timeout.
    pub async fn idle_wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok()
    }
}
