//! Transfer task execution
//!
//! Turns a transfer task into a downstream activity or decision task and
//! reports completion back to the ack manager.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::ack_manager::AckManager;
use super::health::HealthSignal;
use crate::error::TransferError;
use crate::persistence::{CreateTaskRequest, TaskStore, TransferTaskInfo};
use crate::reliability::RetryPolicy;

/// Dispatches transfer tasks to the task store with bounded retries
pub struct TaskExecutor {
    ack_manager: Arc<AckManager>,
    task_store: Arc<dyn TaskStore>,
    retry: RetryPolicy,
}

impl TaskExecutor {
    /// Create a new executor
    pub fn new(
        ack_manager: Arc<AckManager>,
        task_store: Arc<dyn TaskStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ack_manager,
            task_store,
            retry,
        }
    }

    /// Dispatch one transfer task
    ///
    /// Shutdown is checked before every attempt and interrupts the delay
    /// between attempts; an abandoned task is not marked complete. Exhausting
    /// the retry budget returns [`TransferError::RetryExhausted`], which the
    /// caller must treat as fatal for the shard.
    pub async fn process(
        &self,
        task: &TransferTaskInfo,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), TransferError> {
        let task_id = task.task_id;
        debug!(task_id, task_type = %task.task_type, "Processing transfer task");

        let request = CreateTaskRequest::for_transfer_task(task);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if *shutdown_rx.borrow() {
                debug!(task_id, attempt, "Shutdown observed, abandoning transfer task");
                return Err(TransferError::Cancelled(task_id));
            }

            let err = match self.task_store.create_task(request.clone()).await {
                Ok(()) => {
                    self.ack_manager.complete_task(task_id);
                    return Ok(());
                }
                Err(e) => e,
            };

            if !self.retry.has_attempts_remaining(attempt) {
                error!(
                    task_id,
                    attempts = attempt,
                    error = %err,
                    "Retry count exceeded for transfer task"
                );
                return Err(TransferError::RetryExhausted {
                    task_id,
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            warn!(task_id, attempt, error = %err, "Processor failed to create task");

            tokio::select! {
                _ = tokio::time::sleep(self.retry.delay_for_attempt(attempt + 1)) => {}
                changed = shutdown_rx.changed() => {
                    // Sender gone means the processor itself is gone.
                    if changed.is_err() {
                        return Err(TransferError::Cancelled(task_id));
                    }
                }
            }
        }
    }

    /// Worker loop: process tasks until the channel is closed and drained
    pub(crate) async fn run_worker(
        self: Arc<Self>,
        worker_id: usize,
        tasks: async_channel::Receiver<TransferTaskInfo>,
        mut shutdown_rx: watch::Receiver<bool>,
        health: Arc<HealthSignal>,
    ) {
        debug!(worker_id, "Transfer task worker started");

        while let Ok(task) = tasks.recv().await {
            match self.process(&task, &mut shutdown_rx).await {
                Ok(()) => {}
                Err(TransferError::Cancelled(_)) => {}
                Err(e) => match e.fatal_condition() {
                    Some(condition) => {
                        health.raise(condition);
                    }
                    None => error!(worker_id, task_id = task.task_id, error = %e, "Transfer task failed"),
                },
            }
        }

        debug!(worker_id, "Transfer task worker exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::persistence::{
        DownstreamTask, InMemoryExecutionStore, InMemoryShardContext, InMemoryTaskStore,
        WorkflowExecution,
    };

    struct Fixture {
        manager: Arc<AckManager>,
        task_store: Arc<InMemoryTaskStore>,
        tasks: Vec<TransferTaskInfo>,
    }

    async fn fixture(ids: &[i64], task_store: InMemoryTaskStore) -> Fixture {
        let shard = Arc::new(InMemoryShardContext::new(1));
        let store = Arc::new(InMemoryExecutionStore::new(1));
        store.add_tasks(ids.iter().map(|id| {
            TransferTaskInfo::activity(*id, WorkflowExecution::new("wf", "run"), "list", *id + 100)
        }));
        let manager = Arc::new(AckManager::new(shard, store, 10));
        let tasks = manager.read_transfer_tasks().await.unwrap();
        Fixture {
            manager,
            task_store: Arc::new(task_store),
            tasks,
        }
    }

    fn executor(f: &Fixture, retry: RetryPolicy) -> TaskExecutor {
        TaskExecutor::new(f.manager.clone(), f.task_store.clone(), retry)
    }

    #[tokio::test]
    async fn test_success_completes_task() {
        let f = fixture(&[1], InMemoryTaskStore::new()).await;
        let (_tx, mut rx) = watch::channel(false);

        executor(&f, RetryPolicy::default())
            .process(&f.tasks[0], &mut rx)
            .await
            .unwrap();

        assert_eq!(f.manager.outstanding().get(&1), Some(&true));
        let created = f.task_store.created_tasks();
        assert_eq!(created.len(), 1);
        assert_eq!(
            created[0].data,
            DownstreamTask::Activity {
                task_list: "list".into(),
                schedule_id: 101,
                task_id: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let f = fixture(&[1], InMemoryTaskStore::new()).await;
        f.task_store.fail_next_creates(2);
        let (_tx, mut rx) = watch::channel(false);

        executor(&f, RetryPolicy::fixed(Duration::from_millis(1), 3))
            .process(&f.tasks[0], &mut rx)
            .await
            .unwrap();

        assert_eq!(f.task_store.attempts_for(1), 3);
        assert_eq!(f.manager.outstanding().get(&1), Some(&true));
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_task_pending() {
        let f = fixture(&[7], InMemoryTaskStore::new()).await;
        f.task_store.always_fail_task(7);
        let (_tx, mut rx) = watch::channel(false);

        let err = executor(&f, RetryPolicy::fixed(Duration::from_millis(1), 3))
            .process(&f.tasks[0], &mut rx)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::RetryExhausted {
                task_id: 7,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(f.task_store.attempts_for(7), 3);
        assert_eq!(f.manager.outstanding().get(&7), Some(&false));
    }

    #[tokio::test]
    async fn test_shutdown_before_first_attempt() {
        let f = fixture(&[1], InMemoryTaskStore::new()).await;
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        let err = executor(&f, RetryPolicy::default())
            .process(&f.tasks[0], &mut rx)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Cancelled(1)));
        assert_eq!(f.task_store.attempts_for(1), 0);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_retry_delay() {
        let f = fixture(&[1], InMemoryTaskStore::new()).await;
        f.task_store.always_fail_task(1);
        let (tx, rx) = watch::channel(false);

        let executor = Arc::new(executor(&f, RetryPolicy::fixed(Duration::from_secs(3600), 10)));
        let task = f.tasks[0].clone();
        let handle = tokio::spawn({
            let executor = executor.clone();
            let mut rx = rx.clone();
            async move { executor.process(&task, &mut rx).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("retry delay was not interrupted")
            .unwrap();
        assert!(matches!(result, Err(TransferError::Cancelled(1))));
        assert_eq!(f.task_store.attempts_for(1), 1);
        assert_eq!(f.manager.outstanding().get(&1), Some(&false));
    }

    #[tokio::test]
    async fn test_worker_drains_closed_channel() {
        let f = fixture(&[1, 2, 3], InMemoryTaskStore::new()).await;
        let (_tx, rx) = watch::channel(false);
        let (task_tx, task_rx) = async_channel::bounded(10);
        for task in f.tasks.clone() {
            task_tx.send(task).await.unwrap();
        }
        task_tx.close();

        let health = Arc::new(HealthSignal::new(1));
        Arc::new(executor(&f, RetryPolicy::default()))
            .run_worker(0, task_rx, rx, health.clone())
            .await;

        assert_eq!(f.task_store.created_tasks().len(), 3);
        assert!(f.manager.outstanding().values().all(|done| *done));
        assert!(!health.is_raised());
    }

    #[tokio::test]
    async fn test_worker_raises_fatal_on_exhaustion() {
        let f = fixture(&[1, 2], InMemoryTaskStore::new()).await;
        f.task_store.always_fail_task(1);
        let (_tx, rx) = watch::channel(false);
        let (task_tx, task_rx) = async_channel::bounded(10);
        for task in f.tasks.clone() {
            task_tx.send(task).await.unwrap();
        }
        task_tx.close();

        let health = Arc::new(HealthSignal::new(1));
        Arc::new(executor(&f, RetryPolicy::fixed(Duration::from_millis(1), 2)))
            .run_worker(0, task_rx, rx, health.clone())
            .await;

        assert_eq!(health.current().unwrap().task_id(), 1);
        assert_eq!(f.manager.outstanding().get(&1), Some(&false));
        assert_eq!(f.manager.outstanding().get(&2), Some(&true));
    }
}
