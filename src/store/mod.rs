//! Storage node implementations reachable through
//! [`PartitionDispatcher`](crate::write::dispatch::PartitionDispatcher)

pub mod memory;

pub use memory::{MemoryStoreCluster, PartitionData};
