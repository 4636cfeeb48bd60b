//! Sled-backed persistent tables.
//!
//! One database, two trees: `cache_index` keyed by cache key and `jobs`
//! keyed by job id. Values are serde_json documents so the on-disk rows stay
//! readable with generic tooling.

use quire_traits::{CacheIndex, JobTable, StoreError};
use quire_types::{CacheEntry, CacheKey, Job, JobId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

const CACHE_TREE: &str = "cache_index";
const JOB_TREE: &str = "jobs";

fn backend(err: sled::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Decodes every row of a tree. Rows that fail to decode are skipped with a
/// warning rather than failing the whole load.
fn load_tree<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>, StoreError> {
    let mut rows = Vec::new();
    for item in tree.iter() {
        let (key, value) = item.map_err(backend)?;
        match serde_json::from_slice(&value) {
            Ok(row) => rows.push(row),
            Err(e) => log::warn!(
                "[STORE] Skipping undecodable row {} in {}: {}",
                String::from_utf8_lossy(&key),
                String::from_utf8_lossy(&tree.name()),
                e
            ),
        }
    }
    Ok(rows)
}

/// Handle to the service database.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(backend)?;
        Ok(Self { db })
    }

    /// A throwaway database that is deleted when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(backend)?;
        Ok(Self { db })
    }

    pub fn cache_index(&self) -> Result<SledCacheIndex, StoreError> {
        let tree = self.db.open_tree(CACHE_TREE).map_err(backend)?;
        Ok(SledCacheIndex { tree })
    }

    pub fn job_table(&self) -> Result<SledJobTable, StoreError> {
        let tree = self.db.open_tree(JOB_TREE).map_err(backend)?;
        Ok(SledJobTable { tree })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(backend)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SledCacheIndex {
    tree: sled::Tree,
}

impl CacheIndex for SledCacheIndex {
    fn load_all(&self) -> Result<Vec<CacheEntry>, StoreError> {
        load_tree(&self.tree)
    }

    fn put(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        self.tree
            .insert(entry.key.as_str().as_bytes(), encode(entry)?)
            .map_err(backend)?;
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.tree.remove(key.as_str().as_bytes()).map_err(backend)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.tree.flush().map_err(backend)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SledJobTable {
    tree: sled::Tree,
}

impl JobTable for SledJobTable {
    fn load_all(&self) -> Result<Vec<Job>, StoreError> {
        load_tree(&self.tree)
    }

    fn put(&self, job: &Job) -> Result<(), StoreError> {
        self.tree
            .insert(job.id.as_uuid().as_bytes(), encode(job)?)
            .map_err(backend)?;
        Ok(())
    }

    fn remove(&self, id: &JobId) -> Result<(), StoreError> {
        self.tree.remove(id.as_uuid().as_bytes()).map_err(backend)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.tree.flush().map_err(backend)?;
        Ok(())
    }
}
