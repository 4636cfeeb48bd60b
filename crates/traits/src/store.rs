//! Persisted tables behind the cache store and the job queue.
//!
//! Both tables are written through by their owners while the owner's own
//! lock is held, so implementations must be synchronous and cheap. Reads
//! only happen at start-up (`load_all`) to rebuild in-memory state.

use quire_types::{CacheEntry, CacheKey, Job, JobId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Failed to (de)serialize record: {0}")]
    Serialization(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// The cache index table: one row per cache key.
pub trait CacheIndex: Send + Sync + Debug {
    fn load_all(&self) -> Result<Vec<CacheEntry>, StoreError>;

    /// Insert or replace the row for `entry.key`.
    fn put(&self, entry: &CacheEntry) -> Result<(), StoreError>;

    fn remove(&self, key: &CacheKey) -> Result<(), StoreError>;

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// The job table: one row per job id.
pub trait JobTable: Send + Sync + Debug {
    fn load_all(&self) -> Result<Vec<Job>, StoreError>;

    fn put(&self, job: &Job) -> Result<(), StoreError>;

    fn remove(&self, id: &JobId) -> Result<(), StoreError>;

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Cache index kept in process memory. Survives nothing; used by tests and
/// by embedders that do not need restart recovery.
#[derive(Debug, Default)]
pub struct InMemoryCacheIndex {
    rows: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl InMemoryCacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.rows.read().ok()?.get(key).cloned()
    }
}

impl CacheIndex for InMemoryCacheIndex {
    fn load_all(&self) -> Result<Vec<CacheEntry>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows.values().cloned().collect())
    }

    fn put(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::LockPoisoned)?;
        rows.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::LockPoisoned)?;
        rows.remove(key);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryJobTable {
    rows: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.rows.read().ok()?.get(id).cloned()
    }
}

impl JobTable for InMemoryJobTable {
    fn load_all(&self) -> Result<Vec<Job>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows.values().cloned().collect())
    }

    fn put(&self, job: &Job) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::LockPoisoned)?;
        rows.insert(job.id, job.clone());
        Ok(())
    }

    fn remove(&self, id: &JobId) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::LockPoisoned)?;
        rows.remove(id);
        Ok(())
    }
}
