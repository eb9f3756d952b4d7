//! Transfer queue processor configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::PollerConfig;
use crate::reliability::RetryPolicy;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range or inconsistent with another
    #[error("invalid transfer processor configuration: {0}")]
    Invalid(String),
}

/// Transfer queue processor configuration
///
/// Defaults match the production constants: batches of 10, polling between
/// 10ms and 10s, ack flush every second, 10 workers, 10 attempts 100ms apart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferProcessorConfig {
    /// Poller configuration (batch size and poll interval bounds)
    pub poller: PollerConfig,

    /// How often the ack level is advanced and persisted
    #[serde(with = "duration_millis")]
    pub update_ack_interval: Duration,

    /// Number of task workers
    pub worker_count: usize,

    /// Per-task retry budget
    pub retry: RetryPolicy,

    /// How long `stop()` waits for the pump to exit
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    /// How long the pump waits for workers to drain on shutdown
    #[serde(with = "duration_millis")]
    pub worker_shutdown_timeout: Duration,

    /// Run one last ack flush after workers drain
    pub flush_on_shutdown: bool,
}

impl Default for TransferProcessorConfig {
    fn default() -> Self {
        Self {
            poller: PollerConfig::default(),
            update_ack_interval: Duration::from_secs(1),
            worker_count: 10,
            retry: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(60),
            worker_shutdown_timeout: Duration::from_secs(10),
            flush_on_shutdown: true,
        }
    }
}

impl TransferProcessorConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Unset or unparsable variables keep their default value.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |key: &str| {
            lookup(key)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        let number = |key: &str| lookup(key).and_then(|s| s.parse::<usize>().ok());

        let mut config = Self::default();

        if let Some(size) = number("TRANSFER_BATCH_SIZE") {
            config.poller = config.poller.with_batch_size(size);
        }
        if let Some(interval) = millis("TRANSFER_MIN_POLL_INTERVAL_MS") {
            config.poller = config.poller.with_min_interval(interval);
        }
        if let Some(interval) = millis("TRANSFER_MAX_POLL_INTERVAL_MS") {
            config.poller = config.poller.with_max_interval(interval);
        }
        if let Some(interval) = millis("TRANSFER_UPDATE_ACK_INTERVAL_MS") {
            config.update_ack_interval = interval;
        }
        if let Some(count) = number("TRANSFER_WORKER_COUNT") {
            config = config.with_worker_count(count);
        }
        if let Some(attempts) = lookup("TRANSFER_RETRY_MAX_ATTEMPTS").and_then(|s| s.parse().ok())
        {
            config.retry = config.retry.with_max_attempts(attempts);
        }
        if let Some(interval) = millis("TRANSFER_RETRY_INTERVAL_MS") {
            config.retry = config.retry.with_interval(interval);
        }
        if let Some(timeout) = millis("TRANSFER_SHUTDOWN_TIMEOUT_MS") {
            config.shutdown_timeout = timeout;
        }
        if let Some(timeout) = millis("TRANSFER_WORKER_SHUTDOWN_TIMEOUT_MS") {
            config.worker_shutdown_timeout = timeout;
        }
        if let Some(flag) = lookup("TRANSFER_FLUSH_ON_SHUTDOWN").and_then(|s| parse_flag(&s)) {
            config.flush_on_shutdown = flag;
        }

        config
    }

    /// Set poller configuration
    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    /// Set the ack flush interval
    pub fn with_update_ack_interval(mut self, interval: Duration) -> Self {
        self.update_ack_interval = interval;
        self
    }

    /// Set the number of workers
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Set the per-task retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the pump shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the worker drain timeout
    pub fn with_worker_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.worker_shutdown_timeout = timeout;
        self
    }

    /// Enable or disable the final ack flush on shutdown
    pub fn with_flush_on_shutdown(mut self, flush: bool) -> Self {
        self.flush_on_shutdown = flush;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poller.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be non-zero".into()));
        }
        if self.poller.min_interval.is_zero() {
            return Err(ConfigError::Invalid("min poll interval must be non-zero".into()));
        }
        let multiplier = self.poller.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff_multiplier must be a finite value >= 1.0, got {multiplier}"
            )));
        }
        if self.poller.min_interval > self.poller.max_interval {
            return Err(ConfigError::Invalid(
                "min poll interval must not exceed max poll interval".into(),
            ));
        }
        if self.update_ack_interval.is_zero() {
            return Err(ConfigError::Invalid("update_ack_interval must be non-zero".into()));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be non-zero".into()));
        }
        Ok(())
    }
}

/// Parse a boolean flag, accepting the usual spellings in any case
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
