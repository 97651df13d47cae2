//! Coordinator metadata store
//!
//! Stores:
//! - Routing entries (partition → owner, epoch)
//! - The last durable snapshot id
//! - Commits whose delivery is still in doubt
//! - Backup records and backup images
//! - The graph schema

use crate::common::{KVStore, Result, SnapshotId};
use crate::executor::routing::Partition;
use crate::ops::backup::BackupRecord;
use crate::schema::GraphSchema;
use crate::write::recovery::InDoubtCommit;
use std::sync::Arc;

const ROUTING_PREFIX: &str = "routing/";
const SNAPSHOT_KEY: &str = "snapshot/last";
const BACKUP_RECORD_PREFIX: &str = "backup/record/";
const BACKUP_IMAGE_PREFIX: &str = "backup/image/";
const BACKUP_NEXT_ID_KEY: &str = "backup/next_id";
const SCHEMA_KEY: &str = "schema/current";
const IN_DOUBT_PREFIX: &str = "commit/in_doubt/";

/// Typed access to coordinator state over a [`KVStore`] backend
pub struct MetadataStore {
    backend: Arc<dyn KVStore>,
}

impl MetadataStore {
    pub fn new(backend: Arc<dyn KVStore>) -> Self {
        Self { backend }
    }

    // === Routing ===

    pub fn put_partition(&self, partition: &Partition) -> Result<()> {
        let value = bincode::serialize(partition)?;
        self.backend
            .put(&format!("{}{:010}", ROUTING_PREFIX, partition.id), &value)
    }

    pub fn list_partitions(&self) -> Result<Vec<Partition>> {
        self.backend
            .scan_prefix(ROUTING_PREFIX)?
            .into_iter()
            .map(|(_, bytes)| bincode::deserialize::<Partition>(&bytes).map_err(Into::into))
            .collect()
    }

    // === Snapshot watermark ===

    pub fn put_last_snapshot(&self, snapshot_id: SnapshotId) -> Result<()> {
        self.backend.put(SNAPSHOT_KEY, &snapshot_id.to_le_bytes())
    }

    pub fn last_snapshot(&self) -> Result<SnapshotId> {
        match self.backend.get(SNAPSHOT_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    crate::Error::MetadataCorrupted("snapshot watermark is not 8 bytes".into())
                })?;
                Ok(SnapshotId::from_le_bytes(raw))
            }
            None => Ok(0),
        }
    }

    // === In-doubt commits ===

    pub fn put_in_doubt(&self, commit: &InDoubtCommit) -> Result<()> {
        let value = bincode::serialize(commit)?;
        self.backend
            .put(&format!("{}{:020}", IN_DOUBT_PREFIX, commit.snapshot_id), &value)
    }

    pub fn delete_in_doubt(&self, snapshot_id: SnapshotId) -> Result<()> {
        self.backend
            .delete(&format!("{}{:020}", IN_DOUBT_PREFIX, snapshot_id))
    }

    /// In-doubt commits, oldest snapshot first
    pub fn list_in_doubt(&self) -> Result<Vec<InDoubtCommit>> {
        self.backend
            .scan_prefix(IN_DOUBT_PREFIX)?
            .into_iter()
            .map(|(_, bytes)| bincode::deserialize::<InDoubtCommit>(&bytes).map_err(Into::into))
            .collect()
    }

    // === Schema ===

    pub fn put_schema(&self, schema: &GraphSchema) -> Result<()> {
        self.backend.put(SCHEMA_KEY, &serde_json::to_vec(schema)?)
    }

    pub fn get_schema(&self) -> Result<Option<GraphSchema>> {
        match self.backend.get(SCHEMA_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // === Backups ===

    /// Allocate the next backup id (ids start at 1 and are never reused)
    pub fn allocate_backup_id(&self) -> Result<u32> {
        let next = match self.backend.get(BACKUP_NEXT_ID_KEY)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    crate::Error::MetadataCorrupted("backup id counter is not 4 bytes".into())
                })?;
                u32::from_le_bytes(raw)
            }
            None => 1,
        };
        self.backend
            .put(BACKUP_NEXT_ID_KEY, &(next + 1).to_le_bytes())?;
        Ok(next)
    }

    pub fn put_backup_record(&self, record: &BackupRecord) -> Result<()> {
        let value = bincode::serialize(record)?;
        self.backend
            .put(&format!("{}{:010}", BACKUP_RECORD_PREFIX, record.id), &value)
    }

    pub fn get_backup_record(&self, id: u32) -> Result<Option<BackupRecord>> {
        match self
            .backend
            .get(&format!("{}{:010}", BACKUP_RECORD_PREFIX, id))?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All backup records, oldest first
    pub fn list_backup_records(&self) -> Result<Vec<BackupRecord>> {
        self.backend
            .scan_prefix(BACKUP_RECORD_PREFIX)?
            .into_iter()
            .map(|(_, bytes)| bincode::deserialize::<BackupRecord>(&bytes).map_err(Into::into))
            .collect()
    }

    pub fn put_backup_image(&self, id: u32, image: &[u8]) -> Result<()> {
        self.backend
            .put(&format!("{}{:010}", BACKUP_IMAGE_PREFIX, id), image)
    }

    pub fn get_backup_image(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.backend
            .get(&format!("{}{:010}", BACKUP_IMAGE_PREFIX, id))
    }

    /// Remove a backup record and its image
    pub fn delete_backup(&self, id: u32) -> Result<()> {
        self.backend
            .delete(&format!("{}{:010}", BACKUP_IMAGE_PREFIX, id))?;
        self.backend
            .delete(&format!("{}{:010}", BACKUP_RECORD_PREFIX, id))
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }
}
