//! Owner placement strategies
//!
//! When a node leaves, each partition it owned needs a new live owner. The
//! choice is pluggable: least-loaded, round-robin, or HRW hashing.

use crate::common::{hrw_rank, NodeId, PartitionId, PlacementPolicy};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks an owner for a partition among live candidates.
///
/// `candidates` is sorted and non-empty when called by the engine; `load`
/// holds the current partition count per node, including assignments
/// already planned in the same round.
pub trait PlacementStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn place(
        &self,
        partition: PartitionId,
        candidates: &[NodeId],
        load: &BTreeMap<NodeId, usize>,
    ) -> Option<NodeId>;
}

/// Fewest partitions wins, ties broken by node id
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl PlacementStrategy for LeastLoaded {
    fn name(&self) -> &'static str {
        "least_loaded"
    }

    fn place(
        &self,
        _partition: PartitionId,
        candidates: &[NodeId],
        load: &BTreeMap<NodeId, usize>,
    ) -> Option<NodeId> {
        candidates
            .iter()
            .min_by(|a, b| {
                let la = load.get(*a).copied().unwrap_or(0);
                let lb = load.get(*b).copied().unwrap_or(0);
                la.cmp(&lb).then_with(|| a.cmp(b))
            })
            .cloned()
    }
}

/// Cycles through candidates in order
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl PlacementStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn place(
        &self,
        _partition: PartitionId,
        candidates: &[NodeId],
        _load: &BTreeMap<NodeId, usize>,
    ) -> Option<NodeId> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[idx].clone())
    }
}

/// Highest random weight for the partition; stable under unrelated churn
#[derive(Debug, Default)]
pub struct Hrw;

impl PlacementStrategy for Hrw {
    fn name(&self) -> &'static str {
        "hrw"
    }

    fn place(
        &self,
        partition: PartitionId,
        candidates: &[NodeId],
        _load: &BTreeMap<NodeId, usize>,
    ) -> Option<NodeId> {
        hrw_rank(partition, candidates).into_iter().next()
    }
}

pub fn from_policy(policy: PlacementPolicy) -> Box<dyn PlacementStrategy> {
    match policy {
        PlacementPolicy::LeastLoaded => Box::new(LeastLoaded),
        PlacementPolicy::RoundRobin => Box::new(RoundRobin::default()),
        PlacementPolicy::Hrw => Box::new(Hrw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(ids: &[&str]) -> Vec<NodeId> {
        ids.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[test]
    fn test_least_loaded_prefers_emptiest() {
        let candidates = nodes(&["a", "b", "c"]);
        let mut load = BTreeMap::new();
        load.insert(NodeId::from("a"), 4);
        load.insert(NodeId::from("b"), 1);
        load.insert(NodeId::from("c"), 2);

        assert_eq!(
            LeastLoaded.place(0, &candidates, &load),
            Some(NodeId::from("b"))
        );
    }

    #[test]
    fn test_least_loaded_tie_break_is_deterministic() {
        let candidates = nodes(&["c", "a", "b"]);
        let load = BTreeMap::new();
        assert_eq!(
            LeastLoaded.place(0, &candidates, &load),
            Some(NodeId::from("a"))
        );
    }

    #[test]
    fn test_round_robin_cycles() {
        let rr = RoundRobin::default();
        let candidates = nodes(&["a", "b"]);
        let load = BTreeMap::new();
        let picks: Vec<_> = (0..4)
            .map(|p| rr.place(p, &candidates, &load).unwrap())
            .collect();
        assert_eq!(picks, nodes(&["a", "b", "a", "b"]));
    }

    #[test]
    fn test_no_candidates() {
        let load = BTreeMap::new();
        assert!(LeastLoaded.place(0, &[], &load).is_none());
        assert!(RoundRobin::default().place(0, &[], &load).is_none());
        assert!(Hrw.place(0, &[], &load).is_none());
    }

    #[test]
    fn test_from_policy() {
        assert_eq!(from_policy(PlacementPolicy::Hrw).name(), "hrw");
        assert_eq!(from_policy(PlacementPolicy::RoundRobin).name(), "round_robin");
    }
}
