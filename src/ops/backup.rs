//! Graph backups
//!
//! A backup captures routing, the snapshot watermark and the schema while no
//! batch is in flight. Images are stored as JSON with a blake3 checksum over
//! the payload.

use crate::common::{blake3_hash, MetricsRegistry, Result, SnapshotId};
use crate::executor::engine::ExecutorEngine;
use crate::executor::routing::Partition;
use crate::schema::{GraphSchema, SchemaService};
use crate::write::WriteCoordinator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Complete,
    Failed,
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupStatus::Pending => write!(f, "pending"),
            BackupStatus::Complete => write!(f, "complete"),
            BackupStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: u32,
    pub created_at: DateTime<Utc>,
    pub status: BackupStatus,
    pub snapshot_id: SnapshotId,
    pub partition_count: usize,
}

/// Point-in-time copy of coordinator state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupImage {
    pub backup_id: u32,
    pub snapshot_id: SnapshotId,
    pub created_at: DateTime<Utc>,
    pub routing: Vec<Partition>,
    pub schema: GraphSchema,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredImage {
    checksum: String,
    payload: String,
}

impl BackupImage {
    fn seal(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_string(self)?;
        let stored = StoredImage {
            checksum: blake3_hash(payload.as_bytes()),
            payload,
        };
        Ok(serde_json::to_vec(&stored)?)
    }

    /// Decode a sealed image, checking its checksum
    fn open(bytes: &[u8]) -> std::result::Result<Self, String> {
        let stored: StoredImage =
            serde_json::from_slice(bytes).map_err(|e| format!("unreadable image: {}", e))?;
        let actual = blake3_hash(stored.payload.as_bytes());
        if actual != stored.checksum {
            return Err(format!(
                "checksum mismatch (expected {}, got {})",
                stored.checksum, actual
            ));
        }
        serde_json::from_str(&stored.payload).map_err(|e| format!("unreadable payload: {}", e))
    }
}

pub struct BackupCoordinator {
    engine: Arc<ExecutorEngine>,
    writes: Arc<WriteCoordinator>,
    schema: Arc<SchemaService>,
    metrics: Arc<MetricsRegistry>,
    /// Copy tasks still running; each removes itself when done
    tasks: Arc<Mutex<HashMap<u32, JoinHandle<()>>>>,
}

impl BackupCoordinator {
    pub fn new(
        engine: Arc<ExecutorEngine>,
        writes: Arc<WriteCoordinator>,
        schema: Arc<SchemaService>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            engine,
            writes,
            schema,
            metrics,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn record(&self, id: u32) -> Result<BackupRecord> {
        self.engine
            .metadata()?
            .get_backup_record(id)?
            .ok_or(crate::Error::BackupNotFound(id))
    }

    /// Allocate an id and start copying in the background
    pub fn create(&self) -> Result<u32> {
        let metadata = self.engine.metadata()?;
        let id = metadata.allocate_backup_id()?;
        let mut record = BackupRecord {
            id,
            created_at: Utc::now(),
            status: BackupStatus::Pending,
            snapshot_id: 0,
            partition_count: 0,
        };
        metadata.put_backup_record(&record)?;

        let engine = self.engine.clone();
        let writes = self.writes.clone();
        let schema = self.schema.clone();
        let metrics = self.metrics.clone();
        let tasks = self.tasks.clone();
        // Held across spawn and insert so the task's own removal comes after
        let mut running = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let handle = tokio::spawn(async move {
            let image = writes
                .checkpoint(|snapshot_id| BackupImage {
                    backup_id: id,
                    snapshot_id,
                    created_at: record.created_at,
                    routing: engine.routing().entries(),
                    schema: schema.get_schema(),
                })
                .await;

            let stored = image
                .seal()
                .and_then(|bytes| metadata.put_backup_image(id, &bytes));
            match stored {
                Ok(()) => {
                    record.status = BackupStatus::Complete;
                    record.snapshot_id = image.snapshot_id;
                    record.partition_count = image.routing.len();
                    metrics.backups_created.inc();
                    tracing::info!(
                        "Backup {} complete (snapshot {}, {} partitions)",
                        id,
                        image.snapshot_id,
                        image.routing.len()
                    );
                }
                Err(e) => {
                    record.status = BackupStatus::Failed;
                    metrics.backups_failed.inc();
                    tracing::error!("Backup {} failed: {}", id, e);
                }
            }
            if let Err(e) = metadata.put_backup_record(&record) {
                tracing::error!("Failed to record backup {} outcome: {}", id, e);
            }
            tasks.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
        });
        running.insert(id, handle);
        drop(running);

        tracing::info!("Backup {} started", id);
        Ok(id)
    }

    /// Number of backups still copying
    pub fn running(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Wait for a backup's copy task and return its final record
    pub async fn wait(&self, id: u32) -> Result<BackupRecord> {
        let handle = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| crate::Error::Internal(format!("backup {} task: {}", id, e)))?;
        }
        self.record(id)
    }

    pub fn list(&self) -> Result<Vec<BackupRecord>> {
        self.engine.metadata()?.list_backup_records()
    }

    pub fn delete(&self, id: u32) -> Result<()> {
        let record = self.record(id)?;
        if record.status == BackupStatus::Pending {
            return Err(crate::Error::InvalidState {
                expected: "complete or failed backup".into(),
                actual: format!("backup {} is pending", id),
            });
        }
        self.engine.metadata()?.delete_backup(id)?;
        tracing::info!("Backup {} deleted", id);
        Ok(())
    }

    /// Keep the `keep` newest complete backups; drop older ones and failed
    /// ones. Pending backups are left alone. Returns the deleted ids.
    pub fn purge(&self, keep: usize) -> Result<Vec<u32>> {
        let metadata = self.engine.metadata()?;
        let mut complete: Vec<BackupRecord> = Vec::new();
        let mut doomed: Vec<u32> = Vec::new();
        for record in metadata.list_backup_records()? {
            match record.status {
                BackupStatus::Complete => complete.push(record),
                BackupStatus::Failed => doomed.push(record.id),
                BackupStatus::Pending => {}
            }
        }
        complete.sort_by(|a, b| b.id.cmp(&a.id));
        doomed.extend(complete.iter().skip(keep).map(|r| r.id));
        doomed.sort_unstable();

        for id in &doomed {
            metadata.delete_backup(*id)?;
        }
        tracing::info!("Purged {} backups (keeping {})", doomed.len(), keep);
        Ok(doomed)
    }

    /// Check a backup's integrity. A bad backup yields `(false, reason)`;
    /// only a missing record is an error.
    pub fn verify(&self, id: u32) -> Result<(bool, String)> {
        let record = self.record(id)?;
        if record.status != BackupStatus::Complete {
            return Ok((false, format!("backup {} is {}", id, record.status)));
        }
        let Some(bytes) = self.engine.metadata()?.get_backup_image(id)? else {
            return Ok((false, format!("backup {} has no image", id)));
        };
        let image = match BackupImage::open(&bytes) {
            Ok(image) => image,
            Err(reason) => return Ok((false, format!("backup {}: {}", id, reason))),
        };

        if image.routing.len() != record.partition_count {
            return Ok((
                false,
                format!(
                    "backup {} holds {} partitions, record says {}",
                    id,
                    image.routing.len(),
                    record.partition_count
                ),
            ));
        }
        let mut ids: Vec<u32> = image.routing.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        let expected = 0..record.partition_count as u32;
        if ids.len() != record.partition_count || !ids.iter().copied().eq(expected) {
            return Ok((false, format!("backup {} does not cover every partition", id)));
        }
        if image.snapshot_id != record.snapshot_id {
            return Ok((
                false,
                format!(
                    "backup {} image is at snapshot {}, record says {}",
                    id, image.snapshot_id, record.snapshot_id
                ),
            ));
        }
        Ok((true, format!("backup {} is valid", id)))
    }

    /// Replace current state with a backup.
    ///
    /// Refused while the engine is serving. The image is written as JSON under
    /// both `meta_path` and `store_path` before state is swapped in.
    pub async fn restore(&self, id: u32, meta_path: &Path, store_path: &Path) -> Result<()> {
        if self.engine.is_serving() {
            return Err(crate::Error::InvalidState {
                expected: "stopped engine".into(),
                actual: self.engine.state().to_string(),
            });
        }
        let (ok, reason) = self.verify(id)?;
        if !ok {
            return Err(crate::Error::MetadataCorrupted(reason));
        }
        let bytes = self
            .engine
            .metadata()?
            .get_backup_image(id)?
            .ok_or(crate::Error::BackupNotFound(id))?;
        let image = BackupImage::open(&bytes).map_err(crate::Error::MetadataCorrupted)?;

        let json = serde_json::to_vec_pretty(&image)?;
        let file_name = format!("backup_{}.json", id);
        for dir in [meta_path, store_path] {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(dir.join(&file_name), &json).await?;
        }

        self.engine.restore_routing(image.routing)?;
        self.schema.restore(image.schema)?;
        self.writes.restore_watermark(image.snapshot_id).await?;
        self.metrics.backups_restored.inc();
        tracing::info!("Restored backup {} (snapshot {})", id, image.snapshot_id);
        Ok(())
    }
}
