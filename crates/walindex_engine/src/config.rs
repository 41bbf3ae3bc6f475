//! Configuration for the CDC engine.

use crate::error::{CdcError, CdcResult};
use rand::Rng;
use std::time::Duration;
use walindex_protocol::DECODING_PLUGIN;

/// Configuration for the CDC engine and its worker.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name of the logical replication slot.
    pub slot_name: String,
    /// Output plugin the slot must use.
    pub plugin: String,
    /// How long a triggering caller waits for its cycle.
    pub cycle_timeout: Duration,
    /// Retry configuration for transient slot and database errors.
    pub retry: RetryConfig,
    /// Maximum queued cycle requests.
    pub queue_capacity: usize,
    /// Name of the worker thread.
    pub worker_name: String,
    /// Rows fetched per round trip while peeking the slot.
    pub fetch_size: u32,
}

impl EngineConfig {
    /// Creates a configuration for the given slot.
    pub fn new(slot_name: impl Into<String>) -> Self {
        Self {
            slot_name: slot_name.into(),
            plugin: DECODING_PLUGIN.to_string(),
            cycle_timeout: Duration::from_secs(10),
            retry: RetryConfig::no_retry(),
            queue_capacity: 16,
            worker_name: "walindex-cdc".to_string(),
            fetch_size: 500,
        }
    }

    /// Sets the cycle timeout.
    pub fn with_cycle_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the worker thread name.
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Sets the peek fetch size.
    pub fn with_fetch_size(mut self, size: u32) -> Self {
        self.fetch_size = size;
        self
    }

    /// Checks the configuration.
    ///
    /// Slot names end up inside SQL text, so only `[a-z0-9_]` is accepted.
    pub fn validate(&self) -> CdcResult<()> {
        if self.slot_name.is_empty() {
            return Err(CdcError::Config("slot name is empty".into()));
        }
        if !self
            .slot_name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(CdcError::Config(format!(
                "slot name [{}] may only contain lower case letters, digits and underscores",
                self.slot_name
            )));
        }
        if self.plugin.is_empty() {
            return Err(CdcError::Config("plugin is empty".into()));
        }
        if self.queue_capacity == 0 {
            return Err(CdcError::Config("queue capacity must be positive".into()));
        }
        if self.fetch_size == 0 {
            return Err(CdcError::Config("fetch size must be positive".into()));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("elk_slot")
    }
}

const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Backoff between attempts of a cycle that hit a transient slot or
/// database error.
///
/// The pause before attempt `n` is bounded by `base_delay * 2^(n-1)`, capped
/// at `max_delay`. With jitter the pause is drawn from the upper half of that
/// bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts per cycle, the first one included.
    pub max_attempts: u32,
    /// Bound of the pause before the second attempt.
    pub base_delay: Duration,
    /// Cap of any pause.
    pub max_delay: Duration,
    /// Randomize pauses within the upper half of their bound.
    pub jitter: bool,
}

impl RetryConfig {
    /// Up to `max_attempts` attempts with the default reconnect backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: RETRY_BASE_DELAY,
            max_delay: RETRY_MAX_DELAY,
            jitter: true,
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Sets the bound of the first pause.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the cap of any pause.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Pause before `attempt`, counted from 0. The first attempt runs at once.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(doublings) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let factor = 1u32.checked_shl(doublings).unwrap_or(u32::MAX);
        let bound = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter {
            return bound;
        }

        let floor = bound / 2;
        let spread = u64::try_from((bound - floor).as_micros()).unwrap_or(u64::MAX);
        floor + Duration::from_micros(rand::thread_rng().gen_range(0..=spread))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
