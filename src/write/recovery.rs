//! Commits stuck after the commit point
//!
//! Once the watermark is persisted a snapshot is durable. An owner that could
//! not be told to commit keeps its sub-batch staged; the coordinator records
//! the gap here and re-delivers until the owner acknowledges. Partitions with
//! an undelivered commit accept no later snapshot.

use crate::common::{NodeId, PartitionId, SnapshotId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Owners that have not acknowledged the commit of one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InDoubtCommit {
    pub snapshot_id: SnapshotId,
    pub owners: BTreeMap<NodeId, BTreeSet<PartitionId>>,
}

impl InDoubtCommit {
    pub fn new(snapshot_id: SnapshotId) -> Self {
        Self {
            snapshot_id,
            owners: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, node: NodeId, partitions: impl IntoIterator<Item = PartitionId>) {
        self.owners.entry(node).or_default().extend(partitions);
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn partitions(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.owners.values().flatten().copied()
    }
}

/// In-memory view of the in-doubt commits, keyed by snapshot
#[derive(Debug, Default)]
pub struct InDoubtSet {
    commits: BTreeMap<SnapshotId, InDoubtCommit>,
}

impl InDoubtSet {
    pub fn new(commits: impl IntoIterator<Item = InDoubtCommit>) -> Self {
        Self {
            commits: commits
                .into_iter()
                .filter(|c| !c.is_empty())
                .map(|c| (c.snapshot_id, c))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn insert(&mut self, commit: InDoubtCommit) {
        if !commit.is_empty() {
            self.commits.insert(commit.snapshot_id, commit);
        }
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &InDoubtCommit> {
        self.commits.values()
    }

    /// Drop `node` from a snapshot's owners; returns the remaining record,
    /// or `None` once every owner has acknowledged
    pub fn acknowledge(&mut self, snapshot_id: SnapshotId, node: &NodeId) -> Option<&InDoubtCommit> {
        let commit = self.commits.get_mut(&snapshot_id)?;
        commit.owners.remove(node);
        if commit.is_empty() {
            self.commits.remove(&snapshot_id);
            return None;
        }
        self.commits.get(&snapshot_id)
    }

    /// First in-doubt snapshot holding any of `partitions`
    pub fn blocking<'a>(
        &self,
        partitions: impl IntoIterator<Item = &'a PartitionId> + Clone,
    ) -> Option<(SnapshotId, PartitionId)> {
        self.commits.values().find_map(|c| {
            partitions
                .clone()
                .into_iter()
                .find(|pid| c.partitions().any(|held| held == **pid))
                .map(|pid| (c.snapshot_id, *pid))
        })
    }

    pub fn clear(&mut self) {
        self.commits.clear();
    }
}
