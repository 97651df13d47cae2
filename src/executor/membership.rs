//! Cluster membership handling
//!
//! Join/leave notifications arrive from the discovery layer at-least-once and
//! in no particular order across nodes. They are queued here without blocking
//! the caller and applied one at a time by a single task, so routing is never
//! mutated re-entrantly from several callback threads.

use crate::common::{Epoch, NodeId, PartitionId, Result};
use crate::executor::engine::ExecutorEngine;
use crate::executor::placement::PlacementStrategy;
use crate::executor::routing::Partition;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    NodesJoined(Vec<NodeId>),
    NodesLeft(Vec<NodeId>),
}

/// A planned ownership change for one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassignment {
    pub partition: PartitionId,
    pub from: NodeId,
    pub to: NodeId,
    pub epoch: Epoch,
}

/// Result of planning a round of moves
#[derive(Debug, Default)]
pub struct MovePlan {
    pub moves: Vec<Reassignment>,
    /// Partitions that could not be placed (no live node)
    pub stranded: Vec<PartitionId>,
}

/// Choose a live owner for each partition in `to_move`.
///
/// Partitions are placed in id order, and each placement is counted in the
/// load seen by the next one so least-loaded spreads a batch evenly.
pub fn plan_reassignments(
    to_move: &[Partition],
    owners: &[Partition],
    live: &BTreeSet<NodeId>,
    strategy: &dyn PlacementStrategy,
) -> MovePlan {
    let candidates: Vec<NodeId> = live.iter().cloned().collect();
    let mut load: BTreeMap<NodeId, usize> = candidates.iter().map(|n| (n.clone(), 0)).collect();
    for p in owners {
        if let Some(count) = load.get_mut(&p.owner) {
            *count += 1;
        }
    }

    let mut sorted: Vec<&Partition> = to_move.iter().collect();
    sorted.sort_by_key(|p| p.id);

    let mut plan = MovePlan::default();
    for p in sorted {
        match strategy.place(p.id, &candidates, &load) {
            Some(target) => {
                *load.entry(target.clone()).or_insert(0) += 1;
                plan.moves.push(Reassignment {
                    partition: p.id,
                    from: p.owner.clone(),
                    to: target,
                    epoch: p.epoch + 1,
                });
            }
            None => plan.stranded.push(p.id),
        }
    }
    plan
}

/// Queue of membership events feeding an [`ExecutorEngine`]
pub struct MembershipWatcher {
    tx: mpsc::UnboundedSender<(u64, MembershipEvent)>,
    next_seq: Mutex<u64>,
    applied: watch::Receiver<u64>,
}

impl MembershipWatcher {
    /// Start the event loop for `engine`
    pub fn spawn(engine: Arc<ExecutorEngine>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<(u64, MembershipEvent)>();
        let (applied_tx, applied_rx) = watch::channel(0u64);

        let handle = tokio::spawn(async move {
            while let Some((seq, event)) = rx.recv().await {
                let moves = engine.handle_membership(&event);
                tracing::debug!(
                    "Membership event #{} applied ({} partitions moved)",
                    seq,
                    moves.len()
                );
                applied_tx.send_replace(seq);
            }
            tracing::info!("Membership watcher stopped");
        });

        let watcher = Self {
            tx,
            next_seq: Mutex::new(0),
            applied: applied_rx,
        };
        (watcher, handle)
    }

    /// Enqueue an event; returns its sequence number
    pub fn notify(&self, event: MembershipEvent) -> Result<u64> {
        let mut next = self.next_seq.lock().unwrap_or_else(|e| e.into_inner());
        let seq = *next + 1;
        self.tx
            .send((seq, event))
            .map_err(|_| crate::Error::Internal("membership watcher is not running".into()))?;
        *next = seq;
        Ok(seq)
    }

    pub fn on_nodes_join(&self, nodes: Vec<NodeId>) -> Result<u64> {
        self.notify(MembershipEvent::NodesJoined(nodes))
    }

    pub fn on_nodes_leave(&self, nodes: Vec<NodeId>) -> Result<u64> {
        self.notify(MembershipEvent::NodesLeft(nodes))
    }

    /// Wait until the event with sequence `seq` has been applied
    pub async fn wait_applied(&self, seq: u64) -> Result<()> {
        let mut rx = self.applied.clone();
        rx.wait_for(|applied| *applied >= seq)
            .await
            .map(|_| ())
            .map_err(|_| crate::Error::Internal("membership watcher stopped".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::placement::{Hrw, LeastLoaded};

    fn part(id: PartitionId, owner: &str, epoch: Epoch) -> Partition {
        Partition::new(id, owner, epoch)
    }

    fn live(ids: &[&str]) -> BTreeSet<NodeId> {
        ids.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[test]
    fn test_plan_spreads_departed_partitions() {
        let owners = vec![
            part(0, "a", 1),
            part(1, "b", 1),
            part(2, "c", 3),
            part(3, "c", 1),
        ];
        let to_move: Vec<Partition> = owners.iter().filter(|p| p.owner.as_str() == "c").cloned().collect();

        let plan = plan_reassignments(&to_move, &owners, &live(&["a", "b"]), &LeastLoaded);
        assert!(plan.stranded.is_empty());
        assert_eq!(plan.moves.len(), 2);
        assert_eq!(plan.moves[0].partition, 2);
        assert_eq!(plan.moves[0].epoch, 4);
        assert_eq!(plan.moves[0].to, NodeId::from("a"));
        assert_eq!(plan.moves[1].to, NodeId::from("b"));
    }

    #[test]
    fn test_plan_without_live_nodes_strands() {
        let owners = vec![part(0, "a", 1)];
        let plan = plan_reassignments(&owners, &owners, &BTreeSet::new(), &Hrw);
        assert!(plan.moves.is_empty());
        assert_eq!(plan.stranded, vec![0]);
    }
}
