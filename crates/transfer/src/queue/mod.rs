//! Transfer queue processing
//!
//! This module provides:
//! - [`AckManager`] - Read level and ack level (watermark) tracking
//! - [`TaskPoller`] - Batch reads with exponential idle backoff
//! - [`TaskExecutor`] - Downstream task dispatch with bounded retries
//! - [`TransferQueueProcessor`] - Pump, worker pool and lifecycle
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TransferQueueProcessor                      │
//! │  ┌─────────────┐  ┌─────────────────┐  ┌────────────────┐   │
//! │  │ TaskPoller  │  │  Ack flush      │  │  Shutdown      │   │
//! │  │ (10ms..10s) │  │   (1s)          │  │  (watch)       │   │
//! │  └──────┬──────┘  └────────┬────────┘  └────────────────┘   │
//! │         │                  │                                 │
//! │         ▼                  ▼                                 │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    AckManager                        │    │
//! │  │  read_level ─ outstanding {id: done} ─ ack_level     │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         │ bounded channel (batch_size)     ▲ complete_task   │
//! │         ▼                                  │                 │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │               TaskExecutor workers                   │    │
//! │  │  [Worker 1] [Worker 2] ... [Worker N] → TaskStore    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The ack level only moves over a contiguous run of completed tasks. A task
//! that fails every dispatch attempt pins it in place, so exhausting the
//! retry budget is reported as a [`FatalCondition`](crate::FatalCondition).

mod ack_manager;
mod executor;
mod health;
mod poller;
mod processor;

pub use ack_manager::{AckLevelSnapshot, AckManager};
pub use executor::TaskExecutor;
pub use poller::{PollerConfig, TaskPoller};
pub use processor::{ProcessorStatus, TransferQueueProcessor};
