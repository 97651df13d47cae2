//! Key-value backends for coordinator metadata
//!
//! Supports an in-memory map (tests, standalone mode) and RocksDB.

use crate::common::config::StorageBackend;
use crate::common::Result;
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Trait for key-value storage backends
pub trait KVStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
    fn flush(&self) -> Result<()>;
}

/// In-memory store
#[derive(Default)]
pub struct MemStore {
    map: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.map
            .lock()
            .map_err(|_| crate::Error::Internal("memory store lock poisoned".into()))
    }
}

impl KVStore for MemStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.map()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.map()?.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .map()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// RocksDB store
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }
}

impl KVStore for RocksStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db.put(key.as_bytes(), value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.db.delete(key.as_bytes())?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key_bytes, value) = item?;
            if !key_bytes.starts_with(prefix.as_bytes()) {
                break;
            }
            let key = String::from_utf8(key_bytes.to_vec())
                .map_err(|_| crate::Error::MetadataCorrupted("Invalid UTF-8 key".into()))?;
            out.push((key, value.to_vec()));
        }
        Ok(out)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Open the backend described by the configuration
pub fn open_backend(backend: &StorageBackend) -> Result<Arc<dyn KVStore>> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(MemStore::new())),
        StorageBackend::Rocksdb { path } => Ok(Arc::new(RocksStore::open(path)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(store: &dyn KVStore) {
        store.put("routing/00000001", b"one").unwrap();
        store.put("routing/00000002", b"two").unwrap();
        store.put("snapshot/last", b"x").unwrap();

        assert_eq!(store.get("routing/00000001").unwrap().unwrap(), b"one");
        assert!(store.get("missing").unwrap().is_none());

        let scanned = store.scan_prefix("routing/").unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].0, "routing/00000001");

        store.delete("routing/00000001").unwrap();
        assert_eq!(store.scan_prefix("routing/").unwrap().len(), 1);
        store.flush().unwrap();
    }

    #[test]
    fn test_mem_store() {
        exercise(&MemStore::new());
    }

    #[test]
    fn test_rocks_store() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("meta")).unwrap();
        exercise(&store);
    }
}
