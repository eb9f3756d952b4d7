//! Store trait definitions for the transfer queue

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error type for store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The caller's range ID no longer owns the shard
    #[error("shard ownership lost: request range_id {request}, current range_id {current}")]
    ShardOwnershipLost { request: i64, current: i64 },

    /// Database error
    #[error("database error: {0}")]
    Database(String),
}

/// Kind of downstream work a transfer task dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferTaskType {
    /// Dispatch an activity task
    Activity,

    /// Dispatch a decision task
    Decision,
}

impl std::fmt::Display for TransferTaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Activity => write!(f, "activity"),
            Self::Decision => write!(f, "decision"),
        }
    }
}

/// A due transfer task read from the shard's queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTaskInfo {
    pub task_id: i64,
    pub task_type: TransferTaskType,
    pub workflow_id: String,
    pub run_id: String,
    pub task_list: String,
    pub schedule_id: i64,
}

impl TransferTaskInfo {
    /// Create an activity transfer task
    pub fn activity(
        task_id: i64,
        execution: WorkflowExecution,
        task_list: impl Into<String>,
        schedule_id: i64,
    ) -> Self {
        Self {
            task_id,
            task_type: TransferTaskType::Activity,
            workflow_id: execution.workflow_id,
            run_id: execution.run_id,
            task_list: task_list.into(),
            schedule_id,
        }
    }

    /// Create a decision transfer task
    pub fn decision(
        task_id: i64,
        execution: WorkflowExecution,
        task_list: impl Into<String>,
        schedule_id: i64,
    ) -> Self {
        Self {
            task_type: TransferTaskType::Decision,
            ..Self::activity(task_id, execution, task_list, schedule_id)
        }
    }

    /// The workflow execution this task belongs to
    pub fn execution(&self) -> WorkflowExecution {
        WorkflowExecution::new(self.workflow_id.clone(), self.run_id.clone())
    }
}

/// Identity of one workflow run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: String,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

/// Payload handed to the downstream task list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownstreamTask {
    Activity {
        task_list: String,
        schedule_id: i64,
        task_id: i64,
    },
    Decision {
        task_list: String,
        schedule_id: i64,
        task_id: i64,
    },
}

impl DownstreamTask {
    /// Build the downstream payload for a transfer task
    pub fn from_transfer_task(task: &TransferTaskInfo) -> Self {
        let task_list = task.task_list.clone();
        match task.task_type {
            TransferTaskType::Activity => Self::Activity {
                task_list,
                schedule_id: task.schedule_id,
                task_id: task.task_id,
            },
            TransferTaskType::Decision => Self::Decision {
                task_list,
                schedule_id: task.schedule_id,
                task_id: task.task_id,
            },
        }
    }

    /// The transfer task this payload originated from
    pub fn task_id(&self) -> i64 {
        match self {
            Self::Activity { task_id, .. } | Self::Decision { task_id, .. } => *task_id,
        }
    }
}

/// Request for a batch of transfer tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetTransferTasksRequest {
    /// Only tasks with an ID strictly greater than this are returned
    pub read_level: i64,
    pub batch_size: usize,
    /// Shard ownership fencing token
    pub range_id: i64,
}

/// Request to remove a processed transfer task from the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompleteTransferTaskRequest {
    pub task_id: i64,
}

/// Request to enqueue one downstream task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTaskRequest {
    pub execution: WorkflowExecution,
    pub task_list: String,
    pub data: DownstreamTask,
}

impl CreateTaskRequest {
    /// Build the create request for a transfer task
    pub fn for_transfer_task(task: &TransferTaskInfo) -> Self {
        Self {
            execution: task.execution(),
            task_list: task.task_list.clone(),
            data: DownstreamTask::from_transfer_task(task),
        }
    }
}

/// Store holding a shard's transfer-task queue
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    /// Read tasks with ID > `read_level`, ascending, at most `batch_size`
    ///
    /// Must fail with [`StoreError::ShardOwnershipLost`] when `range_id` is stale.
    async fn get_transfer_tasks(
        &self,
        request: GetTransferTasksRequest,
    ) -> Result<Vec<TransferTaskInfo>, StoreError>;

    /// Remove a processed task. Completing an already completed task is not an error.
    async fn complete_transfer_task(
        &self,
        request: CompleteTransferTaskRequest,
    ) -> Result<(), StoreError>;
}

/// Downstream task lists fed by the transfer queue
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Enqueue one downstream task (at-least-once)
    async fn create_task(&self, request: CreateTaskRequest) -> Result<(), StoreError>;
}
