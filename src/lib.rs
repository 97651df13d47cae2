//! # minigraph
//!
//! Coordination layer for a partitioned graph store:
//! - Epoch-guarded partition routing, updated as storage nodes join and leave
//! - Snapshot-ordered batch writes with two-phase fan-out to partition owners
//! - Remote flush barrier waiting for a snapshot to land everywhere
//! - Schema management, bulk data load and backups
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  batch / flush   ┌──────────────────────────────┐
//! │ WriteSession │ ───────────────▶ │ Coordinator                  │
//! └──────────────┘   (HTTP/JSON)    │  WriteCoordinator (2PC)      │
//!                                   │  FlushBarrier                │
//!  membership join/leave ─────────▶ │  ExecutorEngine ─ Routing    │
//!                                   │  Schema / DataLoad / Backup  │
//!                                   └──────────────┬───────────────┘
//!                                                  │ PartitionDispatcher
//!                           ┌──────────────────────┼──────────────────┐
//!                      ┌────▼─────┐           ┌────▼─────┐       ┌────▼─────┐
//!                      │ store-1  │           │ store-2  │       │ store-3  │
//!                      │ p0 p3 p6 │           │ p1 p4 p7 │       │ p2 p5    │
//!                      └──────────┘           └──────────┘       └──────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! minigraph-coord serve \
//!   --id coord-1 \
//!   --bind 0.0.0.0:7000 \
//!   --db ./coord-data \
//!   --nodes store-1,store-2,store-3
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minigraph schema load ./schema.json
//! minigraph backup create --wait
//! minigraph backup purge --keep 3
//! minigraph partitions
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod coordinator;
pub mod executor;
pub mod ops;
pub mod schema;
pub mod store;
pub mod write;

// Re-export commonly used types
pub use common::{ClientConfig, Config, Error, Result};
pub use coordinator::{Coordinator, GraphClient};
pub use executor::ExecutorEngine;
pub use write::{WriteCoordinator, WriteSession};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
