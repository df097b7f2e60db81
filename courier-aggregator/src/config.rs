//! Configuration for the event aggregator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the poller starts when no durable offset exists yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FirstEventRepr", into = "FirstEventRepr")]
pub enum FirstEvent {
    /// Process the log from the beginning.
    Oldest,
    /// Only process events inserted from now on.
    Newest,
    /// Start with this exact event sequence.
    Sequence(i64),
}

/// Wire form of [`FirstEvent`]: `"oldest"`, `"newest"`, or an integer.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FirstEventRepr {
    Sequence(i64),
    Named(String),
}

impl From<FirstEvent> for FirstEventRepr {
    fn from(value: FirstEvent) -> Self {
        match value {
            FirstEvent::Oldest => FirstEventRepr::Named("oldest".to_string()),
            FirstEvent::Newest => FirstEventRepr::Named("newest".to_string()),
            FirstEvent::Sequence(n) => FirstEventRepr::Sequence(n),
        }
    }
}

impl TryFrom<FirstEventRepr> for FirstEvent {
    type Error = String;

    fn try_from(value: FirstEventRepr) -> Result<Self, Self::Error> {
        match value {
            FirstEventRepr::Sequence(n) => Ok(FirstEvent::Sequence(n)),
            FirstEventRepr::Named(name) => match name.as_str() {
                "oldest" => Ok(FirstEvent::Oldest),
                "newest" => Ok(FirstEvent::Newest),
                other => Err(format!(
                    "Invalid first event '{other}', expected 'oldest', 'newest' or a sequence"
                )),
            },
        }
    }
}

/// Exponential backoff schedule for batch retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound on any single retry delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Multiplier applied per consecutive failure.
    #[serde(default = "default_factor")]
    pub factor: f64,
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_factor() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            factor: default_factor(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (zero-based):
    /// `min(initial_delay * factor^attempt, max_delay)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.factor.max(1.0);
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * factor.powi(exp);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

/// Configuration for the event aggregator pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Maximum events per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Optional coalescing wait when the first fetch of an idle period comes
    /// back short. `None` hands short batches straight to the handler.
    #[serde(default, with = "humantime_serde")]
    pub batch_timeout: Option<Duration>,

    /// Idle wait when the log has nothing new.
    #[serde(default = "default_poll_timeout", with = "humantime_serde")]
    pub poll_timeout: Duration,

    /// Backoff schedule for failed batches.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Where to start when no durable offset exists.
    #[serde(default = "default_first_event")]
    pub first_event: FirstEvent,

    /// Attempts to read or create the offset before startup is abandoned.
    #[serde(default = "default_startup_attempts")]
    pub startup_attempts: u32,
}

fn default_batch_size() -> usize {
    100
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_first_event() -> FirstEvent {
    FirstEvent::Oldest
}

fn default_startup_attempts() -> u32 {
    5
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout: None,
            poll_timeout: default_poll_timeout(),
            retry: RetryConfig::default(),
            first_event: default_first_event(),
            startup_attempts: default_startup_attempts(),
        }
    }
}

impl AggregatorConfig {
    /// Set the maximum events per batch.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Enable the coalescing wait for short fresh batches.
    #[must_use]
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = Some(timeout);
        self
    }

    /// Set the idle wait.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the retry schedule.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the starting position for a fresh offset.
    #[must_use]
    pub fn with_first_event(mut self, first_event: FirstEvent) -> Self {
        self.first_event = first_event;
        self
    }

    /// Set the startup attempt bound.
    #[must_use]
    pub fn with_startup_attempts(mut self, attempts: u32) -> Self {
        self.startup_attempts = attempts;
        self
    }
}
