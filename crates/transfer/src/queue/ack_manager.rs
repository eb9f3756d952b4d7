//! Ack level tracking for a shard's transfer queue
//!
//! The ack manager remembers every task read from the store until it has been
//! folded into the ack level. Tasks complete in any order, but the ack level
//! only moves over a contiguous prefix of completed tasks: recovery replays
//! from the ack level forward and must never skip pending work.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, trace, warn};

use crate::error::TransferError;
use crate::persistence::{
    CompleteTransferTaskRequest, ExecutionStore, GetTransferTasksRequest, TransferTaskInfo,
};
use crate::shard::ShardContext;

/// Mutable window state, guarded as one unit
#[derive(Debug)]
struct AckState {
    read_level: i64,
    ack_level: i64,
    persisted_ack_level: i64,
    /// task_id -> completed
    outstanding: BTreeMap<i64, bool>,
}

/// Point-in-time view of the ack window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AckLevelSnapshot {
    pub ack_level: i64,
    pub read_level: i64,
    pub persisted_ack_level: i64,
    /// Tasks read but not yet folded into the ack level
    pub outstanding: usize,
    /// Outstanding tasks already completed (waiting on an earlier gap)
    pub completed: usize,
}

/// Tracks the transfer queue read level and ack level for one shard
pub struct AckManager {
    shard: Arc<dyn ShardContext>,
    store: Arc<dyn ExecutionStore>,
    batch_size: usize,
    state: Mutex<AckState>,
    // Mirror of state.read_level; only the reader writes it.
    read_level: AtomicI64,
    // Serializes update_ack_level so the state lock is never held across I/O.
    flush_lock: tokio::sync::Mutex<()>,
}

impl AckManager {
    /// Create an ack manager starting at the shard's persisted ack level
    pub fn new(
        shard: Arc<dyn ShardContext>,
        store: Arc<dyn ExecutionStore>,
        batch_size: usize,
    ) -> Self {
        let ack_level = shard.transfer_ack_level();
        Self {
            shard,
            store,
            batch_size: batch_size.max(1),
            state: Mutex::new(AckState {
                read_level: ack_level,
                ack_level,
                persisted_ack_level: ack_level,
                outstanding: BTreeMap::new(),
            }),
            read_level: AtomicI64::new(ack_level),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Read the next batch of transfer tasks above the read level
    ///
    /// Every returned task is tracked as outstanding. An empty batch means
    /// there is nothing to do right now. A task at or below the read level is
    /// an [`TransferError::OrderingViolation`]; the batch is then rejected as
    /// a whole and no state changes.
    pub async fn read_transfer_tasks(&self) -> Result<Vec<TransferTaskInfo>, TransferError> {
        let request = GetTransferTasksRequest {
            read_level: self.read_level.load(Ordering::Acquire),
            batch_size: self.batch_size,
            range_id: self.shard.range_id(),
        };

        let tasks = self.store.get_transfer_tasks(request).await?;
        if tasks.is_empty() {
            return Ok(tasks);
        }

        let mut state = self.state.lock();

        let mut next_level = state.read_level;
        for task in &tasks {
            if task.task_id <= next_level {
                error!(
                    shard_id = self.shard.shard_id(),
                    task_id = task.task_id,
                    read_level = next_level,
                    "Next task ID is not above current read level"
                );
                return Err(TransferError::OrderingViolation {
                    task_id: task.task_id,
                    read_level: next_level,
                });
            }
            next_level = task.task_id;
        }

        for task in &tasks {
            trace!(task_id = task.task_id, "Moving read level");
            state.outstanding.insert(task.task_id, false);
        }
        state.read_level = next_level;
        self.read_level.store(next_level, Ordering::Release);

        Ok(tasks)
    }

    /// Mark a task as completed
    ///
    /// Unknown IDs (never read, or already folded into the ack level) are ignored.
    pub fn complete_task(&self, task_id: i64) {
        let mut state = self.state.lock();
        if let Some(done) = state.outstanding.get_mut(&task_id) {
            *done = true;
        } else {
            trace!(task_id, "Ignoring completion for untracked task");
        }
    }

    /// Advance the ack level over the completed prefix and persist it
    ///
    /// Each completed task in the prefix is removed from the store before the
    /// ack level moves past it. Scanning stops at the first pending task or
    /// the first store failure. The shard's ack level is persisted at most
    /// once per call, and only when it differs from the last persisted value.
    ///
    /// Returns the newly persisted ack level, or `None` if nothing changed.
    pub async fn update_ack_level(&self) -> Result<Option<i64>, TransferError> {
        let _flush = self.flush_lock.lock().await;

        let candidates: Vec<i64> = {
            let state = self.state.lock();
            state
                .outstanding
                .range(state.ack_level + 1..)
                .map_while(|(&task_id, &done)| done.then_some(task_id))
                .collect()
        };

        for task_id in candidates {
            if let Err(e) = self
                .store
                .complete_transfer_task(CompleteTransferTaskRequest { task_id })
                .await
            {
                warn!(
                    shard_id = self.shard.shard_id(),
                    task_id,
                    error = %e,
                    "Unable to complete transfer task"
                );
                break;
            }

            {
                let mut state = self.state.lock();
                debug!(ack_level = task_id, "Updating ack level");
                state.ack_level = task_id;
                state.outstanding.remove(&task_id);
            }
        }

        let (ack_level, persisted) = {
            let state = self.state.lock();
            (state.ack_level, state.persisted_ack_level)
        };
        if ack_level == persisted {
            return Ok(None);
        }

        self.shard.update_ack_level(ack_level).await?;

        let mut state = self.state.lock();
        state.persisted_ack_level = state.persisted_ack_level.max(ack_level);
        Ok(Some(ack_level))
    }

    /// Current ack level
    pub fn ack_level(&self) -> i64 {
        self.state.lock().ack_level
    }

    /// Current read level
    pub fn read_level(&self) -> i64 {
        self.read_level.load(Ordering::Acquire)
    }

    /// Outstanding tasks and their completion status, ordered by task ID
    pub fn outstanding(&self) -> BTreeMap<i64, bool> {
        self.state.lock().outstanding.clone()
    }

    /// Point-in-time view of the ack window
    pub fn snapshot(&self) -> AckLevelSnapshot {
        let state = self.state.lock();
        AckLevelSnapshot {
            ack_level: state.ack_level,
            read_level: state.read_level,
            persisted_ack_level: state.persisted_ack_level,
            outstanding: state.outstanding.len(),
            completed: state.outstanding.values().filter(|done| **done).count(),
        }
    }
}
