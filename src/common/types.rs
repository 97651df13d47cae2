//! Identifier types shared by the routing and write paths

use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition identifier
pub type PartitionId = u32;

/// Routing epoch of a partition
pub type Epoch = u64;

/// Global write order marker
pub type SnapshotId = u64;

/// Snapshot id returned for a commit that wrote nothing
pub const NO_SNAPSHOT: SnapshotId = 0;

/// Opaque storage node identifier, as supplied by the membership source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
