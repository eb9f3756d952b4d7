//! # Shard Transfer Queue
//!
//! Drains a shard's durable transfer-task queue into downstream activity and
//! decision task lists while tracking a safe recovery checkpoint.
//!
//! ## Features
//!
//! - **Ordered, fenced reads**: batches strictly above the read level, scoped to the shard's range ID
//! - **Bounded dispatch**: a fixed worker pool fed through a bounded channel
//! - **Fixed-delay retries**: each task gets a bounded retry budget; exhaustion marks the shard unhealthy
//! - **Watermark tracking**: the ack level advances only over contiguously completed tasks
//! - **Graceful shutdown**: bounded waits for the pump and workers, with a final ack flush
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ExecutionStore                           │
//! │  (transfer tasks ordered by ID, fenced by range ID)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TransferQueueProcessor                      │
//! │  (poller, ack manager, worker pool, ack flush timer)        │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌───────────────────────────┐  ┌──────────────────────────────┐
//! │        TaskStore          │  │        ShardContext          │
//! │ (activity/decision lists) │  │  (persisted ack level)       │
//! └───────────────────────────┘  └──────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod persistence;
pub mod queue;
pub mod reliability;
pub mod shard;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, TransferProcessorConfig};
    pub use crate::error::{FatalCondition, TransferError};
    pub use crate::persistence::{
        ExecutionStore, InMemoryExecutionStore, InMemoryShardContext, InMemoryTaskStore,
        StoreError, TaskStore, TransferTaskInfo, TransferTaskType, WorkflowExecution,
    };
    pub use crate::queue::{
        AckLevelSnapshot, AckManager, PollerConfig, ProcessorStatus, TransferQueueProcessor,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::shard::ShardContext;
}

// Re-export key types at crate root
pub use config::{ConfigError, TransferProcessorConfig};
pub use error::{FatalCondition, TransferError};
pub use persistence::{ExecutionStore, StoreError, TaskStore, TransferTaskInfo};
pub use queue::{AckManager, PollerConfig, ProcessorStatus, TransferQueueProcessor};
pub use reliability::RetryPolicy;
pub use shard::ShardContext;
