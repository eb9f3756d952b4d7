//! Transfer queue processor lifecycle
//!
//! Wires the ack manager, poller and worker pool together behind a single
//! pump task per shard.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use super::ack_manager::AckManager;
use super::executor::TaskExecutor;
use super::health::HealthSignal;
use super::poller::TaskPoller;
use crate::config::TransferProcessorConfig;
use crate::error::{FatalCondition, TransferError};
use crate::persistence::{ExecutionStore, TaskStore, TransferTaskInfo};
use crate::shard::ShardContext;

/// Processor status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorStatus {
    /// Constructed, pump not started
    Created,
    /// Pump is polling and dispatching
    Running,
    /// Shutdown requested, workers finishing in-flight tasks
    Draining,
    /// Pump has exited after a clean shutdown
    Stopped,
    /// A fatal condition stopped the pump; the shard should be handed off.
    /// Terminal: `stop` keeps this status and `start` refuses it.
    Faulted,
}

/// Transfer queue processor for one shard
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use shard_transfer::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), TransferError> {
/// let shard = Arc::new(InMemoryShardContext::new(1));
/// let execution_store = Arc::new(InMemoryExecutionStore::new(1));
/// let task_store = Arc::new(InMemoryTaskStore::new());
///
/// let processor = TransferQueueProcessor::new(
///     shard,
///     execution_store,
///     task_store,
///     TransferProcessorConfig::default(),
/// )?;
///
/// processor.start()?;
/// // ... later, graceful shutdown
/// processor.stop().await;
/// assert_eq!(processor.status(), ProcessorStatus::Stopped);
/// # Ok(())
/// # }
/// ```
pub struct TransferQueueProcessor {
    shard_id: u32,
    config: TransferProcessorConfig,
    ack_manager: Arc<AckManager>,
    executor: Arc<TaskExecutor>,
    health: Arc<HealthSignal>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    status: Arc<RwLock<ProcessorStatus>>,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TransferQueueProcessor {
    /// Create a processor starting from the shard's persisted ack level
    pub fn new(
        shard: Arc<dyn ShardContext>,
        execution_store: Arc<dyn ExecutionStore>,
        task_store: Arc<dyn TaskStore>,
        config: TransferProcessorConfig,
    ) -> Result<Self, TransferError> {
        config.validate()?;

        let shard_id = shard.shard_id();
        let ack_manager = Arc::new(AckManager::new(
            shard,
            execution_store,
            config.poller.batch_size,
        ));
        let executor = Arc::new(TaskExecutor::new(
            ack_manager.clone(),
            task_store,
            config.retry.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            shard_id,
            config,
            ack_manager,
            executor,
            health: Arc::new(HealthSignal::new(shard_id)),
            shutdown_tx,
            shutdown_rx,
            status: Arc::new(RwLock::new(ProcessorStatus::Created)),
            pump_handle: Mutex::new(None),
        })
    }

    /// Start the pump
    ///
    /// Calling `start` on a running processor does nothing. A stopped or
    /// faulted processor cannot be restarted.
    #[instrument(skip(self), fields(shard_id = self.shard_id))]
    pub fn start(&self) -> Result<(), TransferError> {
        {
            let mut status = self.status.write();
            match *status {
                ProcessorStatus::Created => *status = ProcessorStatus::Running,
                ProcessorStatus::Stopped | ProcessorStatus::Faulted => {
                    return Err(TransferError::AlreadyStopped)
                }
                ProcessorStatus::Running | ProcessorStatus::Draining => return Ok(()),
            }
        }

        let pump = Pump {
            shard_id: self.shard_id,
            config: self.config.clone(),
            ack_manager: self.ack_manager.clone(),
            executor: self.executor.clone(),
            health: self.health.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
            status: self.status.clone(),
        };
        let span = info_span!("transfer_pump", shard_id = self.shard_id);
        *self.pump_handle.lock() = Some(tokio::spawn(pump.run().instrument(span)));

        info!(
            shard_id = self.shard_id,
            ack_level = self.ack_manager.ack_level(),
            worker_count = self.config.worker_count,
            "Transfer queue processor started"
        );
        Ok(())
    }

    /// Stop the processor
    ///
    /// Signals shutdown and waits up to `shutdown_timeout` for the pump to
    /// drain its workers and run the final flush. A pump still running after
    /// that is aborted, together with its workers, so nothing is persisted
    /// once `stop` returns. Repeated calls return immediately.
    ///
    /// A processor that hit a fatal condition ends in
    /// [`ProcessorStatus::Faulted`] rather than `Stopped`.
    #[instrument(skip(self), fields(shard_id = self.shard_id))]
    pub async fn stop(&self) {
        {
            let mut status = self.status.write();
            match *status {
                ProcessorStatus::Stopped => return,
                ProcessorStatus::Created => {
                    *status = ProcessorStatus::Stopped;
                    return;
                }
                ProcessorStatus::Running => *status = ProcessorStatus::Draining,
                ProcessorStatus::Draining | ProcessorStatus::Faulted => {}
            }
        }

        let Some(mut handle) = self.pump_handle.lock().take() else {
            return;
        };

        info!(shard_id = self.shard_id, "Initiating transfer queue processor shutdown");
        let _ = self.shutdown_tx.send(true);

        match tokio::time::timeout(self.config.shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(shard_id = self.shard_id, error = %e, "Transfer pump task failed"),
            Err(_) => {
                warn!(
                    shard_id = self.shard_id,
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "Transfer queue processor timed out on shutdown, aborting pump"
                );
                handle.abort();
                // Wait for the cancellation so no flush is still running.
                let _ = handle.await;
            }
        }

        let final_status = if self.health.is_raised() {
            ProcessorStatus::Faulted
        } else {
            ProcessorStatus::Stopped
        };
        *self.status.write() = final_status;
        info!(shard_id = self.shard_id, status = ?final_status, "Transfer queue processor stopped");
    }

    /// Current status
    pub fn status(&self) -> ProcessorStatus {
        *self.status.read()
    }

    /// The fatal condition raised by this processor, if any
    pub fn health(&self) -> Option<FatalCondition> {
        self.health.current()
    }

    /// Subscribe to fatal condition notifications
    ///
    /// The channel value changes at most once, from `None` to the condition.
    pub fn subscribe_health(&self) -> watch::Receiver<Option<FatalCondition>> {
        self.health.subscribe()
    }

    /// The shard's ack manager
    pub fn ack_manager(&self) -> &Arc<AckManager> {
        &self.ack_manager
    }

    /// Processor configuration
    pub fn config(&self) -> &TransferProcessorConfig {
        &self.config
    }
}

impl Drop for TransferQueueProcessor {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// State moved into the pump task
struct Pump {
    shard_id: u32,
    config: TransferProcessorConfig,
    ack_manager: Arc<AckManager>,
    executor: Arc<TaskExecutor>,
    health: Arc<HealthSignal>,
    shutdown_rx: watch::Receiver<bool>,
    status: Arc<RwLock<ProcessorStatus>>,
}

impl Pump {
    async fn run(mut self) {
        let mut health_rx = self.health.subscribe();
        let (task_tx, task_rx) = async_channel::bounded(self.config.poller.batch_size);

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.worker_count {
            workers.spawn(self.executor.clone().run_worker(
                worker_id,
                task_rx.clone(),
                self.shutdown_rx.clone(),
                self.health.clone(),
            ));
        }
        drop(task_rx);

        let mut poller = TaskPoller::new(self.ack_manager.clone(), self.config.poller.clone());
        let poll_timer = tokio::time::sleep(poller.current_interval());
        tokio::pin!(poll_timer);

        let flush_interval = self.config.update_ack_interval;
        let mut ack_ticker =
            tokio::time::interval_at(Instant::now() + flush_interval, flush_interval);
        ack_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    info!(shard_id = self.shard_id, "Transfer queue processor pump shutting down");
                    break;
                }
                _ = health_rx.changed() => {
                    break;
                }
                _ = &mut poll_timer => {
                    match poller.poll().await {
                        Ok(tasks) => {
                            if !self.dispatch(&task_tx, tasks).await {
                                break;
                            }
                        }
                        Err(e) => {
                            if let Some(condition) = e.fatal_condition() {
                                self.health.raise(condition);
                            }
                            break;
                        }
                    }
                    poll_timer.as_mut().reset(Instant::now() + poller.current_interval());
                }
                _ = ack_ticker.tick() => {
                    self.flush().await;
                }
            }
        }

        if self.health.is_raised() {
            *self.status.write() = ProcessorStatus::Faulted;
        }

        // The pump is the only sender, so closing here lets workers drain and exit.
        task_tx.close();
        drop(task_tx);

        let drained = tokio::time::timeout(self.config.worker_shutdown_timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                shard_id = self.shard_id,
                remaining_workers = workers.len(),
                "Transfer queue processor timed out on worker shutdown"
            );
            workers.abort_all();
        }

        if self.config.flush_on_shutdown {
            self.flush().await;
        }

        debug!(shard_id = self.shard_id, "Transfer pump exited");
    }

    /// Push a batch into the work channel; returns `false` if the pump should stop
    async fn dispatch(
        &mut self,
        task_tx: &async_channel::Sender<TransferTaskInfo>,
        tasks: Vec<TransferTaskInfo>,
    ) -> bool {
        for task in tasks {
            tokio::select! {
                sent = task_tx.send(task) => {
                    if sent.is_err() {
                        return false;
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    debug!(
                        shard_id = self.shard_id,
                        "Shutdown while dispatching, leaving remaining tasks for recovery"
                    );
                    return false;
                }
            }
        }
        true
    }

    async fn flush(&self) {
        match self.ack_manager.update_ack_level().await {
            Ok(Some(ack_level)) => {
                debug!(shard_id = self.shard_id, ack_level, "Persisted transfer ack level")
            }
            Ok(None) => {}
            Err(e) => warn!(
                shard_id = self.shard_id,
                error = %e,
                "Unable to persist transfer ack level"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::persistence::{InMemoryExecutionStore, InMemoryShardContext, InMemoryTaskStore};

    fn processor() -> TransferQueueProcessor {
        TransferQueueProcessor::new(
            Arc::new(InMemoryShardContext::new(3)),
            Arc::new(InMemoryExecutionStore::new(1)),
            Arc::new(InMemoryTaskStore::new()),
            TransferProcessorConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = TransferProcessorConfig {
            worker_count: 0,
            ..TransferProcessorConfig::default()
        };
        let result = TransferQueueProcessor::new(
            Arc::new(InMemoryShardContext::new(3)),
            Arc::new(InMemoryExecutionStore::new(1)),
            Arc::new(InMemoryTaskStore::new()),
            config,
        );
        assert!(matches!(result, Err(TransferError::Config(_))));

        let mut config = TransferProcessorConfig::default();
        config.poller.backoff_multiplier = -2.0;
        let result = TransferQueueProcessor::new(
            Arc::new(InMemoryShardContext::new(3)),
            Arc::new(InMemoryExecutionStore::new(1)),
            Arc::new(InMemoryTaskStore::new()),
            config,
        );
        assert!(matches!(result, Err(TransferError::Config(_))));
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let processor = processor();
        assert_eq!(processor.status(), ProcessorStatus::Created);

        processor.start().unwrap();
        processor.start().unwrap();
        assert_eq!(processor.status(), ProcessorStatus::Running);

        processor.stop().await;
        assert_eq!(processor.status(), ProcessorStatus::Stopped);

        processor.stop().await;
        assert!(matches!(processor.start(), Err(TransferError::AlreadyStopped)));
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let processor = processor();
        tokio::time::timeout(Duration::from_secs(1), processor.stop())
            .await
            .unwrap();
        assert_eq!(processor.status(), ProcessorStatus::Stopped);
        assert!(processor.health().is_none());
    }

    #[tokio::test]
    async fn test_faulted_status_survives_stop() {
        let processor = processor();
        processor.start().unwrap();

        processor.health.raise(FatalCondition::RetryExhausted {
            task_id: 9,
            attempts: 10,
            last_error: "down".into(),
        });
        processor.stop().await;

        assert_eq!(processor.status(), ProcessorStatus::Faulted);
        assert_eq!(processor.health().unwrap().task_id(), 9);
        assert!(matches!(processor.start(), Err(TransferError::AlreadyStopped)));

        processor.stop().await;
        assert_eq!(processor.status(), ProcessorStatus::Faulted);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_value(ProcessorStatus::Faulted).unwrap();
        assert_eq!(json, "faulted");
    }
}
