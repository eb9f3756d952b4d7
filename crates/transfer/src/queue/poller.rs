//! Transfer task polling with exponential backoff
//!
//! Polls the ack manager for due tasks with adaptive polling intervals.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::ack_manager::AckManager;
use crate::error::TransferError;
use crate::persistence::TransferTaskInfo;

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Minimum poll interval (when tasks are available)
    #[serde(with = "crate::config::duration_millis")]
    pub min_interval: Duration,

    /// Maximum poll interval (when idle)
    #[serde(with = "crate::config::duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier when no tasks found
    pub backoff_multiplier: f64,

    /// Maximum tasks to read per poll
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            batch_size: 10,
        }
    }
}

impl PollerConfig {
    /// Create a new poller configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set minimum poll interval
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set maximum poll interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Transfer task poller with adaptive backoff
///
/// Backs off exponentially while the queue is empty or the store is failing,
/// and drops back to the minimum interval as soon as a batch is found so
/// bursts drain at full worker throughput.
pub struct TaskPoller {
    ack_manager: Arc<AckManager>,
    config: PollerConfig,
    current_interval: Duration,
}

impl TaskPoller {
    /// Create a new task poller
    pub fn new(ack_manager: Arc<AckManager>, config: PollerConfig) -> Self {
        Self {
            ack_manager,
            current_interval: config.min_interval,
            config,
        }
    }

    /// Poll for due transfer tasks
    ///
    /// Transient store errors are logged and reported as an empty batch.
    /// Fatal errors are returned to the caller.
    pub async fn poll(&mut self) -> Result<Vec<TransferTaskInfo>, TransferError> {
        let tasks = match self.ack_manager.read_transfer_tasks().await {
            Ok(tasks) => tasks,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Processor unable to retrieve transfer tasks");
                self.increase_backoff();
                return Ok(vec![]);
            }
        };

        if tasks.is_empty() {
            self.increase_backoff();
            trace!(
                interval_ms = self.current_interval.as_millis() as u64,
                "No transfer tasks found, backing off"
            );
        } else {
            self.reset_backoff();
            debug!(count = tasks.len(), "Read transfer tasks");
        }

        Ok(tasks)
    }

    /// Get the current poll interval
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Reset backoff to minimum interval
    fn reset_backoff(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    /// Increase backoff interval
    ///
    /// The result always stays within `[min_interval, max_interval]`, even for
    /// a multiplier that never went through validation.
    fn increase_backoff(&mut self) {
        let next = Duration::try_from_secs_f64(
            self.current_interval.as_secs_f64() * self.config.backoff_multiplier,
        )
        .unwrap_or(self.config.max_interval);
        self.current_interval = next
            .min(self.config.max_interval)
            .max(self.config.min_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryExecutionStore, InMemoryShardContext, WorkflowExecution};

    fn poller(
        config: PollerConfig,
    ) -> (TaskPoller, Arc<InMemoryExecutionStore>, Arc<AckManager>) {
        let shard = Arc::new(InMemoryShardContext::new(1));
        let store = Arc::new(InMemoryExecutionStore::new(1));
        let manager = Arc::new(AckManager::new(shard, store.clone(), config.batch_size));
        (TaskPoller::new(manager.clone(), config), store, manager)
    }

    fn task(id: i64) -> TransferTaskInfo {
        TransferTaskInfo::decision(id, WorkflowExecution::new("wf", "run"), "list", 0)
    }

    #[test]
    fn test_default_config() {
        let config = PollerConfig::default();
        assert_eq!(config.min_interval, Duration::from_millis(10));
        assert_eq!(config.max_interval, Duration::from_secs(10));
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_config_builder() {
        let config = PollerConfig::new()
            .with_min_interval(Duration::from_millis(50))
            .with_max_interval(Duration::from_secs(1))
            .with_backoff_multiplier(0.5)
            .with_batch_size(0);

        assert_eq!(config.min_interval, Duration::from_millis(50));
        assert_eq!(config.max_interval, Duration::from_secs(1));
        assert_eq!(config.backoff_multiplier, 1.0);
        assert_eq!(config.batch_size, 1);
    }

    #[tokio::test]
    async fn test_empty_polls_double_up_to_max() {
        let config = PollerConfig::new()
            .with_min_interval(Duration::from_millis(10))
            .with_max_interval(Duration::from_millis(100));
        let (mut poller, _, _) = poller(config);

        let mut intervals = Vec::new();
        for _ in 0..6 {
            assert!(poller.poll().await.unwrap().is_empty());
            intervals.push(poller.current_interval().as_millis() as u64);
        }

        assert_eq!(intervals, vec![20, 40, 80, 100, 100, 100]);
    }

    #[tokio::test]
    async fn test_unvalidated_multipliers_stay_within_bounds() {
        for multiplier in [0.5, -2.0, f64::NAN, f64::INFINITY, 1e300] {
            let config = PollerConfig {
                min_interval: Duration::from_millis(10),
                max_interval: Duration::from_millis(100),
                backoff_multiplier: multiplier,
                batch_size: 10,
            };
            let (mut poller, _, _) = poller(config);

            for _ in 0..4 {
                assert!(poller.poll().await.unwrap().is_empty());
                let interval = poller.current_interval();
                assert!(
                    interval >= Duration::from_millis(10) && interval <= Duration::from_millis(100),
                    "multiplier {multiplier} produced {interval:?}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_found_tasks_reset_interval() {
        let (mut poller, store, _) = poller(PollerConfig::default());

        poller.poll().await.unwrap();
        poller.poll().await.unwrap();
        assert_eq!(poller.current_interval(), Duration::from_millis(40));

        store.add_task(task(1));
        assert_eq!(poller.poll().await.unwrap().len(), 1);
        assert_eq!(poller.current_interval(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_store_errors_back_off() {
        let (mut poller, store, _) = poller(PollerConfig::default());
        store.add_task(task(1));
        store.fail_next_reads(2);

        assert!(poller.poll().await.unwrap().is_empty());
        assert!(poller.poll().await.unwrap().is_empty());
        assert_eq!(poller.current_interval(), Duration::from_millis(40));

        assert_eq!(poller.poll().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ordering_violation_is_returned() {
        let (mut poller, store, manager) = poller(PollerConfig::default());
        store.add_task(task(5));
        poller.poll().await.unwrap();

        store.script_next_batch(vec![task(4)]);
        let err = poller.poll().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(manager.read_level(), 5);
    }
}
