//! In-process storage cluster
//!
//! Simulates a set of storage nodes sharing partition data, for the
//! standalone coordinator and for tests. Each node can be made unreachable,
//! slow to apply, or set to refuse prepares or commits.
//!
//! Committed sub-batches queue per partition and apply strictly in snapshot
//! order: a slow apply holds back every later snapshot of that partition, on
//! whichever node it was committed. The applied watermark therefore never
//! passes a snapshot whose data is missing.

use crate::common::{NodeId, PartitionId, Result, SnapshotId};
use crate::write::dispatch::{PartitionDispatcher, SubBatch};
use crate::write::types::WriteRequest;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Committed requests waiting for their turn to apply
#[derive(Debug, Clone)]
struct QueuedApply {
    ready_at: Instant,
    requests: Vec<WriteRequest>,
}

/// Applied state of one partition
#[derive(Debug, Clone, Default, Serialize)]
pub struct PartitionData {
    pub applied: SnapshotId,
    pub vertices: BTreeSet<String>,
    pub edges: usize,
    #[serde(skip)]
    queued: BTreeMap<SnapshotId, QueuedApply>,
}

impl PartitionData {
    /// Snapshots committed here but not yet applied
    pub fn queued(&self) -> Vec<SnapshotId> {
        self.queued.keys().copied().collect()
    }

    /// Apply the ready prefix of the queue, in snapshot order
    fn drain(&mut self, now: Instant) {
        while let Some(entry) = self.queued.first_entry() {
            if entry.get().ready_at > now {
                break;
            }
            let (snapshot_id, queued) = entry.remove_entry();
            for req in queued.requests {
                match req {
                    WriteRequest::InsertVertex { key, .. } => {
                        self.vertices.insert(key.routing_key());
                    }
                    WriteRequest::InsertEdge { .. } => self.edges += 1,
                }
            }
            self.applied = self.applied.max(snapshot_id);
        }
    }
}

#[derive(Debug, Default)]
struct NodeSlot {
    unreachable: AtomicBool,
    reject_prepare: AtomicBool,
    fail_commit: AtomicBool,
    apply_delay_ms: AtomicU64,
    prepared: Mutex<HashMap<SnapshotId, SubBatch>>,
}

#[derive(Debug, Default)]
pub struct MemoryStoreCluster {
    nodes: RwLock<HashMap<NodeId, Arc<NodeSlot>>>,
    partitions: Arc<Mutex<HashMap<PartitionId, PartitionData>>>,
    calls: AtomicU64,
}

impl MemoryStoreCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(nodes: &[NodeId]) -> Self {
        let cluster = Self::new();
        for n in nodes {
            cluster.add_node(n.clone());
        }
        cluster
    }

    pub fn add_node(&self, node: NodeId) {
        self.nodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(node)
            .or_default();
    }

    fn slot(&self, node: &NodeId, partition: PartitionId) -> Result<Arc<NodeSlot>> {
        let slot = self
            .nodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(node)
            .cloned();
        match slot {
            Some(slot) if !slot.unreachable.load(Ordering::SeqCst) => Ok(slot),
            Some(_) => Err(crate::Error::Unreachable {
                node: node.clone(),
                partition,
                reason: "node is down".into(),
            }),
            None => Err(crate::Error::Unreachable {
                node: node.clone(),
                partition,
                reason: "unknown node".into(),
            }),
        }
    }

    pub fn set_reachable(&self, node: &NodeId, reachable: bool) {
        if let Some(slot) = self.nodes.read().unwrap_or_else(|e| e.into_inner()).get(node) {
            slot.unreachable.store(!reachable, Ordering::SeqCst);
        }
    }

    pub fn set_apply_delay(&self, node: &NodeId, delay: Duration) {
        if let Some(slot) = self.nodes.read().unwrap_or_else(|e| e.into_inner()).get(node) {
            slot.apply_delay_ms
                .store(delay.as_millis() as u64, Ordering::SeqCst);
        }
    }

    pub fn set_reject_prepare(&self, node: &NodeId, reject: bool) {
        if let Some(slot) = self.nodes.read().unwrap_or_else(|e| e.into_inner()).get(node) {
            slot.reject_prepare.store(reject, Ordering::SeqCst);
        }
    }

    /// Make commits on `node` fail as unreachable; staged batches are kept
    pub fn set_fail_commit(&self, node: &NodeId, fail: bool) {
        if let Some(slot) = self.nodes.read().unwrap_or_else(|e| e.into_inner()).get(node) {
            slot.fail_commit.store(fail, Ordering::SeqCst);
        }
    }

    /// Number of dispatcher calls received so far
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn partition(&self, partition: PartitionId) -> Option<PartitionData> {
        self.partitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&partition)
            .cloned()
    }

    /// Snapshots staged but neither committed nor aborted on `node`
    pub fn prepared_on(&self, node: &NodeId) -> Vec<SnapshotId> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<SnapshotId> = nodes
            .get(node)
            .map(|slot| {
                slot.prepared
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .keys()
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }
}

fn enqueue(
    partitions: &Mutex<HashMap<PartitionId, PartitionData>>,
    snapshot_id: SnapshotId,
    batch: SubBatch,
    ready_at: Instant,
) {
    let mut partitions = partitions.lock().unwrap_or_else(|e| e.into_inner());
    let now = Instant::now();
    for (pid, requests) in batch {
        let data = partitions.entry(pid).or_default();
        data.queued
            .insert(snapshot_id, QueuedApply { ready_at, requests });
        data.drain(now);
    }
}

fn drain(partitions: &Mutex<HashMap<PartitionId, PartitionData>>, pids: &[PartitionId]) {
    let mut partitions = partitions.lock().unwrap_or_else(|e| e.into_inner());
    let now = Instant::now();
    for pid in pids {
        if let Some(data) = partitions.get_mut(pid) {
            data.drain(now);
        }
    }
}

#[async_trait]
impl PartitionDispatcher for MemoryStoreCluster {
    async fn prepare(&self, node: &NodeId, snapshot_id: SnapshotId, batch: SubBatch) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let partition = batch.keys().next().copied().unwrap_or_default();
        let slot = self.slot(node, partition)?;
        if slot.reject_prepare.load(Ordering::SeqCst) {
            return Err(crate::Error::BatchRejected {
                snapshot_id,
                partition,
                reason: format!("{} refused prepare", node),
            });
        }
        slot.prepared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(snapshot_id, batch);
        Ok(())
    }

    async fn commit(&self, node: &NodeId, snapshot_id: SnapshotId) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let slot = self.slot(node, 0)?;
        if slot.fail_commit.load(Ordering::SeqCst) {
            return Err(crate::Error::Unreachable {
                node: node.clone(),
                partition: 0,
                reason: "commit not acknowledged".into(),
            });
        }
        let batch = slot
            .prepared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&snapshot_id);
        let Some(batch) = batch else {
            // Already committed
            return Ok(());
        };

        let delay = Duration::from_millis(slot.apply_delay_ms.load(Ordering::SeqCst));
        let pids: Vec<PartitionId> = batch.keys().copied().collect();
        enqueue(&self.partitions, snapshot_id, batch, Instant::now() + delay);
        if !delay.is_zero() {
            let partitions = self.partitions.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                drain(&partitions, &pids);
            });
        }
        Ok(())
    }

    async fn abort(&self, node: &NodeId, snapshot_id: SnapshotId) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let slot = self.slot(node, 0)?;
        slot.prepared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&snapshot_id);
        Ok(())
    }

    async fn applied_snapshot(&self, node: &NodeId, partition: PartitionId) -> Result<SnapshotId> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.slot(node, partition)?;
        Ok(self.partition(partition).map(|p| p.applied).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::types::VertexRecordKey;

    fn sub_batch(pid: PartitionId, id: &str) -> SubBatch {
        let mut batch = SubBatch::new();
        batch.insert(
            pid,
            vec![WriteRequest::InsertVertex {
                key: VertexRecordKey::new("Person").with_key("id", id),
                properties: Default::default(),
            }],
        );
        batch
    }

    #[tokio::test]
    async fn test_prepare_commit_applies() {
        let a = NodeId::from("a");
        let cluster = MemoryStoreCluster::with_nodes(&[a.clone()]);

        cluster.prepare(&a, 1, sub_batch(3, "1")).await.unwrap();
        assert_eq!(cluster.applied_snapshot(&a, 3).await.unwrap(), 0);
        assert_eq!(cluster.prepared_on(&a), vec![1]);

        cluster.commit(&a, 1).await.unwrap();
        cluster.commit(&a, 1).await.unwrap();
        assert_eq!(cluster.applied_snapshot(&a, 3).await.unwrap(), 1);
        assert_eq!(cluster.partition(3).unwrap().vertices.len(), 1);
    }

    #[tokio::test]
    async fn test_abort_discards() {
        let a = NodeId::from("a");
        let cluster = MemoryStoreCluster::with_nodes(&[a.clone()]);
        cluster.prepare(&a, 1, sub_batch(0, "1")).await.unwrap();
        cluster.abort(&a, 1).await.unwrap();
        cluster.commit(&a, 1).await.unwrap();
        assert!(cluster.partition(0).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_node() {
        let a = NodeId::from("a");
        let cluster = MemoryStoreCluster::with_nodes(&[a.clone()]);
        cluster.set_reachable(&a, false);

        let err = cluster.prepare(&a, 1, sub_batch(5, "1")).await.unwrap_err();
        assert!(matches!(err, crate::Error::Unreachable { partition: 5, .. }));
        assert!(err.is_retryable());

        let unknown = cluster
            .applied_snapshot(&NodeId::from("zz"), 0)
            .await
            .unwrap_err();
        assert!(matches!(unknown, crate::Error::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_fast_apply_waits_behind_slow_one() {
        let a = NodeId::from("a");
        let b = NodeId::from("b");
        let cluster = MemoryStoreCluster::with_nodes(&[a.clone(), b.clone()]);
        cluster.set_apply_delay(&a, Duration::from_millis(80));

        // Snapshot 1 lands slowly on a, then the partition moves to b
        cluster.prepare(&a, 1, sub_batch(2, "1")).await.unwrap();
        cluster.commit(&a, 1).await.unwrap();
        cluster.prepare(&b, 2, sub_batch(2, "2")).await.unwrap();
        cluster.commit(&b, 2).await.unwrap();

        let data = cluster.partition(2).unwrap();
        assert_eq!(data.applied, 0);
        assert_eq!(data.queued(), vec![1, 2]);
        assert_eq!(cluster.applied_snapshot(&b, 2).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let data = cluster.partition(2).unwrap();
        assert_eq!(data.applied, 2);
        assert_eq!(data.vertices.len(), 2);
        assert!(data.queued().is_empty());
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_staged_batch() {
        let a = NodeId::from("a");
        let cluster = MemoryStoreCluster::with_nodes(&[a.clone()]);
        cluster.set_fail_commit(&a, true);
        cluster.prepare(&a, 1, sub_batch(0, "1")).await.unwrap();

        assert!(cluster.commit(&a, 1).await.is_err());
        assert_eq!(cluster.prepared_on(&a), vec![1]);

        cluster.set_fail_commit(&a, false);
        cluster.commit(&a, 1).await.unwrap();
        assert_eq!(cluster.partition(0).unwrap().applied, 1);
    }
}
