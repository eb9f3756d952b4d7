//! Persistence layer for the transfer queue
//!
//! This module provides:
//! - [`ExecutionStore`] trait for reading and completing transfer tasks
//! - [`TaskStore`] trait for enqueuing downstream tasks
//! - In-memory implementations of both, plus an in-memory
//!   [`ShardContext`](crate::shard::ShardContext), for testing

mod memory;
mod store;

pub use memory::{InMemoryExecutionStore, InMemoryShardContext, InMemoryTaskStore};
pub use store::{
    CompleteTransferTaskRequest, CreateTaskRequest, DownstreamTask, ExecutionStore,
    GetTransferTasksRequest, StoreError, TaskStore, TransferTaskInfo, TransferTaskType,
    WorkflowExecution,
};
