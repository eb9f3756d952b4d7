//! Shard ownership context
//!
//! A shard owns a partition of workflow state together with its transfer
//! queue. The processor reads its bootstrap ack level and fencing token from
//! here and persists advanced ack levels back.

use async_trait::async_trait;

use crate::persistence::StoreError;

/// Shard collaborator used by the transfer queue
///
/// See [`InMemoryShardContext`](crate::persistence::InMemoryShardContext)
/// for the in-memory implementation.
#[async_trait]
pub trait ShardContext: Send + Sync + 'static {
    /// Shard identifier (for logging)
    fn shard_id(&self) -> u32;

    /// Persisted transfer ack level, used to bootstrap the processor
    fn transfer_ack_level(&self) -> i64;

    /// Current ownership fencing token
    fn range_id(&self) -> i64;

    /// Persist a new transfer ack level
    async fn update_ack_level(&self, ack_level: i64) -> Result<(), StoreError>;
}
