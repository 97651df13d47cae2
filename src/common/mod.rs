//! Common utilities and types shared across minigraph

pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod storage;
pub mod types;
pub mod utils;

pub use config::{ClientConfig, Config, CoordinatorConfig, PlacementPolicy, StorageBackend};
pub use error::{Error, Result};
pub use hash::{blake3_hash, hrw_rank, partition_for_key};
pub use metrics::MetricsRegistry;
pub use storage::{KVStore, MemStore, RocksStore};
pub use types::{Epoch, NodeId, PartitionId, SnapshotId, NO_SNAPSHOT};
pub use utils::{generate_client_id, retry_with_backoff, timestamp_now_millis, validate_label};
