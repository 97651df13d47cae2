//! Hashing utilities for minigraph
//!
//! - BLAKE3 for checksums (backup images)
//! - Partition hashing for write routing
//! - HRW (Highest Random Weight) for owner placement

use crate::common::types::{NodeId, PartitionId};

/// Compute BLAKE3 hash of data, return hex string
pub fn blake3_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("{}", hash)
}

fn hash_u64(data: &[u8]) -> u64 {
    let hash = blake3::hash(data);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(buf)
}

/// Compute the partition a routing key belongs to
pub fn partition_for_key(key: &str, num_partitions: u32) -> PartitionId {
    if num_partitions == 0 {
        return 0;
    }
    (hash_u64(key.as_bytes()) % num_partitions as u64) as PartitionId
}

/// HRW (Highest Random Weight) ordering of nodes for a partition
///
/// Deterministic for a given partition and node set; removing a node only
/// moves the partitions that node was ranked first for.
pub fn hrw_rank(partition: PartitionId, nodes: &[NodeId]) -> Vec<NodeId> {
    let mut weights: Vec<(&NodeId, u64)> = nodes
        .iter()
        .map(|node| {
            let combined = format!("{}{}", partition, node);
            (node, hash_u64(combined.as_bytes()))
        })
        .collect();

    // Sort by weight (descending), ties broken by node id
    weights.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    weights.into_iter().map(|(node, _)| node.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_hash() {
        let hash1 = blake3_hash(b"hello world");
        let hash2 = blake3_hash(b"hello world");
        let hash3 = blake3_hash(b"hello world!");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_partition_for_key() {
        let p1 = partition_for_key("person|id=1", 16);
        let p2 = partition_for_key("person|id=1", 16);
        assert_eq!(p1, p2);
        assert!(p1 < 16);

        let spread: std::collections::HashSet<_> = (0..200)
            .map(|i| partition_for_key(&format!("person|id={}", i), 16))
            .collect();
        assert!(spread.len() > 8);
    }

    #[test]
    fn test_hrw_rank_stable_under_removal() {
        let nodes: Vec<NodeId> = ["a", "b", "c", "d"].iter().map(|n| NodeId::from(*n)).collect();

        let ranked = hrw_rank(7, &nodes);
        assert_eq!(ranked.len(), 4);
        assert_eq!(ranked, hrw_rank(7, &nodes));

        // Removing a non-winner keeps the winner
        let winner = ranked[0].clone();
        let loser = ranked[3].clone();
        let remaining: Vec<NodeId> = nodes.into_iter().filter(|n| *n != loser).collect();
        assert_eq!(hrw_rank(7, &remaining)[0], winner);
    }
}
