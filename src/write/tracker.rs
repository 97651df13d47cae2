//! Per-partition snapshot participation
//!
//! A flush of snapshot N must wait on every partition that took part in any
//! snapshot up to N. Owners apply a partition's snapshots in order, so only
//! the newest participation per partition is kept; state is bounded by the
//! partition count no matter how long a writer goes without flushing.

use crate::common::{PartitionId, SnapshotId};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct Participation {
    /// Lower bound on the oldest unflushed snapshot touching the partition
    oldest: SnapshotId,
    latest: SnapshotId,
}

#[derive(Debug, Default)]
pub struct SnapshotTracker {
    partitions: Mutex<BTreeMap<PartitionId, Participation>>,
}

impl SnapshotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, snapshot_id: SnapshotId, partitions: impl IntoIterator<Item = PartitionId>) {
        let mut tracked = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        for pid in partitions {
            tracked
                .entry(pid)
                .and_modify(|p| p.latest = p.latest.max(snapshot_id))
                .or_insert(Participation {
                    oldest: snapshot_id,
                    latest: snapshot_id,
                });
        }
    }

    /// Partitions that may have been touched at or below `snapshot_id`, each
    /// with the snapshot it must have applied.
    ///
    /// A partition touched again after `snapshot_id` must reach its newest
    /// snapshot; in-order apply makes that a superset of the exact bound.
    pub fn required_for(&self, snapshot_id: SnapshotId) -> BTreeMap<PartitionId, SnapshotId> {
        self.partitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, p)| p.oldest <= snapshot_id)
            .map(|(pid, p)| (*pid, p.latest))
            .collect()
    }

    /// Forget participation at or below a flushed `snapshot_id`
    pub fn prune_through(&self, snapshot_id: SnapshotId) {
        let mut tracked = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        tracked.retain(|_, p| {
            if p.latest <= snapshot_id {
                return false;
            }
            p.oldest = p.oldest.max(snapshot_id + 1);
            true
        });
    }

    pub fn clear(&self) {
        self.partitions.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Number of partitions with unflushed participation
    pub fn len(&self) -> usize {
        self.partitions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_takes_latest_participation() {
        let tracker = SnapshotTracker::new();
        tracker.record(1, [0, 1]);
        tracker.record(2, [1]);
        tracker.record(3, [2]);

        let required = tracker.required_for(2);
        assert_eq!(required.len(), 2);
        assert_eq!(required[&0], 1);
        assert_eq!(required[&1], 2);
        assert!(!required.contains_key(&2));

        // Partition 0 touched again later: the older flush waits for it too
        tracker.record(5, [0]);
        assert_eq!(tracker.required_for(2)[&0], 5);
    }

    #[test]
    fn test_prune_through() {
        let tracker = SnapshotTracker::new();
        tracker.record(1, [0]);
        tracker.record(2, [1]);
        tracker.prune_through(1);

        assert_eq!(tracker.len(), 1);
        assert!(tracker.required_for(1).is_empty());
        assert_eq!(tracker.required_for(5)[&1], 2);
    }

    #[test]
    fn test_prune_keeps_later_participation_visible() {
        let tracker = SnapshotTracker::new();
        tracker.record(1, [4]);
        tracker.record(3, [4]);
        tracker.prune_through(1);

        assert!(tracker.required_for(1).is_empty());
        assert_eq!(tracker.required_for(2)[&4], 3);
        assert_eq!(tracker.required_for(3)[&4], 3);
    }

    #[test]
    fn test_history_bounded_without_flush() {
        let tracker = SnapshotTracker::new();
        for id in 1..=100_000 {
            tracker.record(id, [0, (id % 4) as PartitionId]);
        }
        assert_eq!(tracker.len(), 4);
        assert_eq!(tracker.required_for(1)[&0], 100_000);
    }
}
