//! Transfer queue errors

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::persistence::StoreError;

/// Errors from the ack manager and processor
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The store returned a task at or below the current read level
    #[error("transfer task {task_id} is not above read level {read_level}")]
    OrderingViolation { task_id: i64, read_level: i64 },

    /// A task could not be dispatched within its retry budget
    #[error("retry budget of {attempts} attempts exhausted for transfer task {task_id}: {last_error}")]
    RetryExhausted {
        task_id: i64,
        attempts: u32,
        last_error: String,
    },

    /// Shutdown was observed before the task could be dispatched
    #[error("transfer task {0} abandoned on shutdown")]
    Cancelled(i64),

    /// The processor was already stopped and cannot be restarted
    #[error("transfer queue processor is already stopped")]
    AlreadyStopped,

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TransferError {
    /// Whether this error means the shard's transfer queue cannot safely make progress
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OrderingViolation { .. } | Self::RetryExhausted { .. }
        )
    }

    /// The fatal condition this error represents, if any
    pub fn fatal_condition(&self) -> Option<FatalCondition> {
        match self {
            Self::OrderingViolation {
                task_id,
                read_level,
            } => Some(FatalCondition::OrderingViolation {
                task_id: *task_id,
                read_level: *read_level,
            }),
            Self::RetryExhausted {
                task_id,
                attempts,
                last_error,
            } => Some(FatalCondition::RetryExhausted {
                task_id: *task_id,
                attempts: *attempts,
                last_error: last_error.clone(),
            }),
            _ => None,
        }
    }
}

/// A condition that makes the shard's transfer processing unsafe to continue
///
/// The owning service should treat the shard as unhealthy and hand it off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FatalCondition {
    /// Store returned a non-increasing task ID
    #[error("ordering violation: task {task_id} not above read level {read_level}")]
    OrderingViolation { task_id: i64, read_level: i64 },

    /// A task failed every dispatch attempt; the ack level can never pass it
    #[error("task {task_id} failed {attempts} dispatch attempts")]
    RetryExhausted {
        task_id: i64,
        attempts: u32,
        last_error: String,
    },
}

impl FatalCondition {
    /// The transfer task that triggered the condition
    pub fn task_id(&self) -> i64 {
        match self {
            Self::OrderingViolation { task_id, .. } | Self::RetryExhausted { task_id, .. } => {
                *task_id
            }
        }
    }
}
