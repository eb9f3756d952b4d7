//! In-memory store implementations for testing

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::store::*;
use crate::shard::ShardContext;

/// Consume one injected failure, if any are left
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory implementation of [`ExecutionStore`]
///
/// Holds one shard's transfer queue ordered by task ID and enforces range ID
/// fencing the same way a database-backed store would.
///
/// # Example
///
/// ```
/// use shard_transfer::persistence::{InMemoryExecutionStore, TransferTaskInfo, WorkflowExecution};
///
/// let store = InMemoryExecutionStore::new(1);
/// store.add_task(TransferTaskInfo::decision(1, WorkflowExecution::new("wf", "run"), "tl", 2));
/// assert_eq!(store.pending_task_count(), 1);
/// ```
pub struct InMemoryExecutionStore {
    tasks: RwLock<BTreeMap<i64, TransferTaskInfo>>,
    range_id: AtomicI64,
    completed: RwLock<Vec<i64>>,
    scripted_batches: RwLock<VecDeque<Vec<TransferTaskInfo>>>,
    read_calls: AtomicU32,
    fail_reads: AtomicU32,
    fail_completes: AtomicU32,
    failing_completes: RwLock<HashSet<i64>>,
}

impl InMemoryExecutionStore {
    /// Create an empty store owned by `range_id`
    pub fn new(range_id: i64) -> Self {
        Self {
            tasks: RwLock::new(BTreeMap::new()),
            range_id: AtomicI64::new(range_id),
            completed: RwLock::new(Vec::new()),
            scripted_batches: RwLock::new(VecDeque::new()),
            read_calls: AtomicU32::new(0),
            fail_reads: AtomicU32::new(0),
            fail_completes: AtomicU32::new(0),
            failing_completes: RwLock::new(HashSet::new()),
        }
    }

    /// Append a transfer task to the queue
    pub fn add_task(&self, task: TransferTaskInfo) {
        self.tasks.write().insert(task.task_id, task);
    }

    /// Append several transfer tasks
    pub fn add_tasks(&self, tasks: impl IntoIterator<Item = TransferTaskInfo>) {
        let mut guard = self.tasks.write();
        for task in tasks {
            guard.insert(task.task_id, task);
        }
    }

    /// Move shard ownership to a new range ID, fencing out older readers
    pub fn set_range_id(&self, range_id: i64) {
        self.range_id.store(range_id, Ordering::SeqCst);
    }

    /// Return `batch` verbatim from the next read, bypassing ordering
    pub fn script_next_batch(&self, batch: Vec<TransferTaskInfo>) {
        self.scripted_batches.write().push_back(batch);
    }

    /// Make the next `count` reads fail
    pub fn fail_next_reads(&self, count: u32) {
        self.fail_reads.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` completions fail
    pub fn fail_next_completes(&self, count: u32) {
        self.fail_completes.store(count, Ordering::SeqCst);
    }

    /// Make every completion of `task_id` fail until cleared
    pub fn fail_completes_for_task(&self, task_id: i64) {
        self.failing_completes.write().insert(task_id);
    }

    /// Stop failing completions set up by [`Self::fail_completes_for_task`]
    pub fn clear_complete_failures(&self) {
        self.failing_completes.write().clear();
    }

    /// Number of tasks not yet completed
    pub fn pending_task_count(&self) -> usize {
        self.tasks.read().len()
    }

    /// Task IDs completed so far, in call order
    pub fn completed_task_ids(&self) -> Vec<i64> {
        self.completed.read().clone()
    }

    /// Number of `get_transfer_tasks` calls so far
    pub fn read_calls(&self) -> u32 {
        self.read_calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn get_transfer_tasks(
        &self,
        request: GetTransferTasksRequest,
    ) -> Result<Vec<TransferTaskInfo>, StoreError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);

        let current = self.range_id.load(Ordering::SeqCst);
        if request.range_id != current {
            return Err(StoreError::ShardOwnershipLost {
                request: request.range_id,
                current,
            });
        }

        if take_failure(&self.fail_reads) {
            return Err(StoreError::Database("injected read failure".into()));
        }

        if let Some(batch) = self.scripted_batches.write().pop_front() {
            return Ok(batch);
        }

        let tasks = self.tasks.read();
        Ok(tasks
            .range(request.read_level.saturating_add(1)..)
            .take(request.batch_size)
            .map(|(_, task)| task.clone())
            .collect())
    }

    async fn complete_transfer_task(
        &self,
        request: CompleteTransferTaskRequest,
    ) -> Result<(), StoreError> {
        if take_failure(&self.fail_completes)
            || self.failing_completes.read().contains(&request.task_id)
        {
            return Err(StoreError::Database("injected complete failure".into()));
        }

        self.tasks.write().remove(&request.task_id);
        self.completed.write().push(request.task_id);
        Ok(())
    }
}

/// In-memory implementation of [`TaskStore`]
///
/// Records every accepted downstream task and supports failure injection and
/// artificial latency so worker retry and shutdown paths can be exercised.
pub struct InMemoryTaskStore {
    created: RwLock<Vec<CreateTaskRequest>>,
    attempts: RwLock<HashMap<i64, u32>>,
    always_fail: RwLock<HashSet<i64>>,
    fail_creates: AtomicU32,
    latency: RwLock<Duration>,
}

impl InMemoryTaskStore {
    /// Create an empty task store
    pub fn new() -> Self {
        Self {
            created: RwLock::new(Vec::new()),
            attempts: RwLock::new(HashMap::new()),
            always_fail: RwLock::new(HashSet::new()),
            fail_creates: AtomicU32::new(0),
            latency: RwLock::new(Duration::ZERO),
        }
    }

    /// Delay every `create_task` call by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.write() = latency;
        self
    }

    /// Make the next `count` creates fail
    pub fn fail_next_creates(&self, count: u32) {
        self.fail_creates.store(count, Ordering::SeqCst);
    }

    /// Make every create for `task_id` fail
    pub fn always_fail_task(&self, task_id: i64) {
        self.always_fail.write().insert(task_id);
    }

    /// Downstream tasks accepted so far
    pub fn created_tasks(&self) -> Vec<CreateTaskRequest> {
        self.created.read().clone()
    }

    /// Number of `create_task` calls made for a transfer task
    pub fn attempts_for(&self, task_id: i64) -> u32 {
        self.attempts.read().get(&task_id).copied().unwrap_or(0)
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, request: CreateTaskRequest) -> Result<(), StoreError> {
        let task_id = request.data.task_id();
        *self.attempts.write().entry(task_id).or_insert(0) += 1;

        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.always_fail.read().contains(&task_id) || take_failure(&self.fail_creates) {
            return Err(StoreError::Database(format!(
                "injected create failure for transfer task {task_id}"
            )));
        }

        self.created.write().push(request);
        Ok(())
    }
}

/// In-memory implementation of [`ShardContext`]
///
/// # Example
///
/// ```
/// use shard_transfer::persistence::InMemoryShardContext;
/// use shard_transfer::shard::ShardContext;
///
/// let shard = InMemoryShardContext::new(1).with_ack_level(42);
/// assert_eq!(shard.transfer_ack_level(), 42);
/// ```
pub struct InMemoryShardContext {
    shard_id: u32,
    range_id: AtomicI64,
    ack_level: AtomicI64,
    ack_level_updates: Mutex<Vec<i64>>,
    fail_updates: AtomicU32,
    update_latency: RwLock<Duration>,
}

impl InMemoryShardContext {
    /// Create a shard with ack level 0 and range ID 1
    pub fn new(shard_id: u32) -> Self {
        Self {
            shard_id,
            range_id: AtomicI64::new(1),
            ack_level: AtomicI64::new(0),
            ack_level_updates: Mutex::new(Vec::new()),
            fail_updates: AtomicU32::new(0),
            update_latency: RwLock::new(Duration::ZERO),
        }
    }

    /// Set the persisted ack level
    pub fn with_ack_level(self, ack_level: i64) -> Self {
        self.ack_level.store(ack_level, Ordering::SeqCst);
        self
    }

    /// Set the fencing token
    pub fn with_range_id(self, range_id: i64) -> Self {
        self.range_id.store(range_id, Ordering::SeqCst);
        self
    }

    /// Delay every `update_ack_level` call by `latency`
    pub fn with_update_latency(self, latency: Duration) -> Self {
        *self.update_latency.write() = latency;
        self
    }

    /// Change the fencing token after construction
    pub fn set_range_id(&self, range_id: i64) {
        self.range_id.store(range_id, Ordering::SeqCst);
    }

    /// Every ack level persisted so far, in call order
    pub fn ack_level_updates(&self) -> Vec<i64> {
        self.ack_level_updates.lock().clone()
    }

    /// Make the next `count` ack level updates fail
    pub fn fail_next_updates(&self, count: u32) {
        self.fail_updates.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ShardContext for InMemoryShardContext {
    fn shard_id(&self) -> u32 {
        self.shard_id
    }

    fn transfer_ack_level(&self) -> i64 {
        self.ack_level.load(Ordering::SeqCst)
    }

    fn range_id(&self) -> i64 {
        self.range_id.load(Ordering::SeqCst)
    }

    async fn update_ack_level(&self, ack_level: i64) -> Result<(), StoreError> {
        let latency = *self.update_latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if take_failure(&self.fail_updates) {
            return Err(StoreError::Database("injected ack level update failure".into()));
        }
        self.ack_level.store(ack_level, Ordering::SeqCst);
        self.ack_level_updates.lock().push(ack_level);
        Ok(())
    }
}
