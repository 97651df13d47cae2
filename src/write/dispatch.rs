//! Transport to storage nodes
//!
//! The coordinator talks to partition owners through [`PartitionDispatcher`]
//! only. Each call addresses one node; a sub-batch may span several
//! partitions owned by that node.

use crate::common::{NodeId, PartitionId, Result, SnapshotId};
use crate::write::types::WriteRequest;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Requests for one node, grouped by partition
pub type SubBatch = BTreeMap<PartitionId, Vec<WriteRequest>>;

#[async_trait]
pub trait PartitionDispatcher: Send + Sync {
    /// Stage `batch` on `node` under `snapshot_id`. Nothing becomes visible yet.
    async fn prepare(&self, node: &NodeId, snapshot_id: SnapshotId, batch: SubBatch) -> Result<()>;

    /// Make a prepared snapshot visible. Idempotent.
    async fn commit(&self, node: &NodeId, snapshot_id: SnapshotId) -> Result<()>;

    /// Discard a prepared snapshot. Idempotent; unknown ids are ignored.
    async fn abort(&self, node: &NodeId, snapshot_id: SnapshotId) -> Result<()>;

    /// Highest snapshot `node` has applied for `partition`
    async fn applied_snapshot(&self, node: &NodeId, partition: PartitionId) -> Result<SnapshotId>;
}
