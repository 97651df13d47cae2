//! Partition routing table
//!
//! Maps every known partition to its owning node. Writers go through
//! [`RoutingTable::set`], a compare-and-swap on the partition epoch; readers
//! get an immutable `Arc` snapshot and never observe a half-applied update.

use crate::common::{Epoch, NodeId, PartitionId, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A partition and its current owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub owner: NodeId,
    pub epoch: Epoch,
}

impl Partition {
    pub fn new(id: PartitionId, owner: impl Into<NodeId>, epoch: Epoch) -> Self {
        Self {
            id,
            owner: owner.into(),
            epoch,
        }
    }
}

/// Immutable view of the routing table at one point in time
pub type RoutingSnapshot = Arc<HashMap<PartitionId, Partition>>;

#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: RwLock<RoutingSnapshot>,
    /// Number of accepted updates since creation
    version: AtomicU64,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RoutingSnapshot> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RoutingSnapshot> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Current owner of a partition
    pub fn get(&self, partition_id: PartitionId) -> Result<Partition> {
        self.read()
            .get(&partition_id)
            .cloned()
            .ok_or(crate::Error::PartitionNotFound(partition_id))
    }

    /// Set the owner of a partition if `epoch` is newer than the current one.
    ///
    /// A missing entry counts as epoch 0. Returns `false` when the update is
    /// stale; callers treat that as a no-op.
    pub fn set(&self, partition_id: PartitionId, owner: NodeId, epoch: Epoch) -> bool {
        let mut guard = self.write();
        let current = guard.get(&partition_id).map(|p| p.epoch).unwrap_or(0);
        if epoch <= current {
            return false;
        }
        Arc::make_mut(&mut guard).insert(
            partition_id,
            Partition {
                id: partition_id,
                owner,
                epoch,
            },
        );
        self.version.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Replace every entry at once (backup restore)
    pub(crate) fn replace(&self, partitions: Vec<Partition>) {
        let map: HashMap<PartitionId, Partition> =
            partitions.into_iter().map(|p| (p.id, p)).collect();
        *self.write() = Arc::new(map);
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Point-in-time view of all entries
    pub fn snapshot(&self) -> RoutingSnapshot {
        self.read().clone()
    }

    /// Entries sorted by partition id
    pub fn entries(&self) -> Vec<Partition> {
        let snapshot = self.snapshot();
        let mut entries: Vec<Partition> = snapshot.values().cloned().collect();
        entries.sort_by_key(|p| p.id);
        entries
    }

    /// Partitions currently owned by `node`, sorted
    pub fn owned_by(&self, node: &NodeId) -> Vec<PartitionId> {
        let mut owned: Vec<PartitionId> = self
            .read()
            .values()
            .filter(|p| &p.owner == node)
            .map(|p| p.id)
            .collect();
        owned.sort_unstable();
        owned
    }

    /// Number of partitions per owning node
    pub fn load(&self) -> BTreeMap<NodeId, usize> {
        let mut load = BTreeMap::new();
        for p in self.read().values() {
            *load.entry(p.owner.clone()).or_insert(0) += 1;
        }
        load
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}
