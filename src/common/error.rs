//! Error types for minigraph

use crate::common::types::{NodeId, PartitionId, SnapshotId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Routing Errors ===
    #[error("Partition not found: {0}")]
    PartitionNotFound(PartitionId),

    #[error("No live nodes available to own partition {0}")]
    NoLiveNodes(PartitionId),

    // === Write protocol Errors ===
    #[error("Unknown client id: {0}")]
    UnknownClient(String),

    #[error("Batch at snapshot {snapshot_id} rejected (partition {partition}): {reason}")]
    BatchRejected {
        snapshot_id: SnapshotId,
        partition: PartitionId,
        reason: String,
    },

    #[error("Commit of snapshot {snapshot_id} failed on {node}: {reason}")]
    CommitFailed {
        snapshot_id: SnapshotId,
        node: NodeId,
        reason: String,
    },

    #[error("Node {node} unreachable for partition {partition}: {reason}")]
    Unreachable {
        node: NodeId,
        partition: PartitionId,
        reason: String,
    },

    #[error("Flush of snapshot {snapshot_id} timed out waiting for partition {partition}")]
    FlushTimeout {
        snapshot_id: SnapshotId,
        partition: PartitionId,
    },

    // === Schema / data load Errors ===
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    // === Backup Errors ===
    #[error("Backup not found: {0}")]
    BackupNotFound(u32),

    // === Lifecycle Errors ===
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    #[error("Engine is not serving (state: {0})")]
    NotServing(String),

    #[error("Invalid state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Error reported by a coordinator in an HTTP error body
    #[error("Coordinator returned {status} ({code}): {message}")]
    Remote {
        status: u16,
        code: String,
        message: String,
        retryable: bool,
    },

    // === Metadata Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Metadata corrupted: {0}")]
    MetadataCorrupted(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ConnectionFailed(_)
                | Error::Unreachable { .. }
                | Error::FlushTimeout { .. }
                | Error::BatchRejected { .. }
                | Error::NoLiveNodes(_)
                | Error::Remote {
                    retryable: true,
                    ..
                }
        )
    }

    /// Stable machine-readable code, carried in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::PartitionNotFound(_) => "partition_not_found",
            Error::NoLiveNodes(_) => "no_live_nodes",
            Error::UnknownClient(_) => "unknown_client",
            Error::BatchRejected { .. } => "batch_rejected",
            Error::CommitFailed { .. } => "commit_failed",
            Error::Unreachable { .. } => "unreachable",
            Error::FlushTimeout { .. } => "flush_timeout",
            Error::SchemaConflict(_) => "schema_conflict",
            Error::BackupNotFound(_) => "backup_not_found",
            Error::InitFailed(_) => "init_failed",
            Error::NotServing(_) => "not_serving",
            Error::InvalidState { .. } => "invalid_state",
            Error::InvalidConfig(_) => "invalid_config",
            Error::NotFound(_) => "not_found",
            Error::Timeout(_) => "timeout",
            Error::ConnectionFailed(_) => "connection_failed",
            Error::Remote { .. } => "remote",
            _ => "internal",
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) | Error::PartitionNotFound(_) | Error::BackupNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Error::InvalidConfig(_) | Error::UnknownClient(_) | Error::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::SchemaConflict(_) | Error::InvalidState { .. } => StatusCode::CONFLICT,
            Error::Timeout(_) | Error::FlushTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Error::NotServing(_)
            | Error::Unreachable { .. }
            | Error::NoLiveNodes(_)
            | Error::BatchRejected { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Remote { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::MetadataCorrupted(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            Error::ConnectionFailed(e.to_string())
        } else if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}
