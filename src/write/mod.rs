//! Snapshot-ordered write protocol

pub mod coordinator;
pub mod dispatch;
pub mod flush;
pub mod recovery;
pub mod session;
pub mod tracker;
pub mod types;

pub use coordinator::WriteCoordinator;
pub use dispatch::{PartitionDispatcher, SubBatch};
pub use flush::FlushBarrier;
pub use recovery::{InDoubtCommit, InDoubtSet};
pub use session::{WriteService, WriteSession};
pub use tracker::SnapshotTracker;
pub use types::{EdgeRecordKey, Properties, VertexRecordKey, WriteBatch, WriteRequest};
