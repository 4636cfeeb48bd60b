// src/cache/store.rs
//! Bounded TTL cache of rendered PDFs with LRU eviction.
//!
//! All bookkeeping (lookup, insertion, capacity accounting and eviction)
//! happens under one mutex, and the persisted index is written through while
//! that mutex is held, so concurrent savers can never push the store over
//! capacity. Backing files are deleted after the lock is released; a failed
//! delete is logged and otherwise ignored.

use parking_lot::Mutex;
use quire_render_core::RenderedPdf;
use quire_traits::{CacheIndex, SharedClock, StoreError};
use quire_types::{CacheEntry, CacheKey, ProposalId};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub max_capacity: usize,
    pub ttl: Duration,
}

/// Counters since the store was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Which entries a [`CacheStore::clear`] call removes.
#[derive(Debug, Clone, Copy)]
pub enum ClearScope<'a> {
    Proposal(&'a ProposalId),
    Key(&'a CacheKey),
    All,
}

impl ClearScope<'_> {
    fn matches(&self, entry: &CacheEntry) -> bool {
        match self {
            ClearScope::Proposal(id) => entry.proposal_id == **id,
            ClearScope::Key(key) => entry.key == **key,
            ClearScope::All => true,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

#[derive(Debug)]
pub struct CacheStore {
    inner: Mutex<Inner>,
    index: Arc<dyn CacheIndex>,
    clock: SharedClock,
    settings: CacheSettings,
}

impl CacheStore {
    /// Rebuilds the store from its persisted index. Rows that have expired
    /// or whose file has disappeared are dropped.
    pub fn open(
        index: Arc<dyn CacheIndex>,
        clock: SharedClock,
        settings: CacheSettings,
    ) -> Result<Self, StoreError> {
        let rows = index.load_all()?;
        let store = Self {
            inner: Mutex::new(Inner::default()),
            index,
            clock,
            settings: CacheSettings {
                max_capacity: settings.max_capacity.max(1),
                ..settings
            },
        };

        let now = store.clock.now();
        let mut doomed = Vec::new();
        {
            let mut inner = store.inner.lock();
            for entry in rows {
                if entry.is_expired(now) || !entry.file_path.is_file() {
                    log::info!(
                        "[CACHE] Dropping stale entry {} for proposal '{}'",
                        entry.key.short(),
                        entry.proposal_id
                    );
                    store.unpersist(&entry.key);
                    doomed.push(entry.file_path);
                    continue;
                }
                inner.entries.insert(entry.key.clone(), entry);
            }
            doomed.extend(store.evict_locked(&mut inner, None));
            log::info!("[CACHE] Recovered {} entries", inner.entries.len());
        }
        delete_files(doomed);
        Ok(store)
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    /// Looks up a key. A hit refreshes the entry's LRU position; an expired
    /// entry, or one whose file is gone, is evicted and reported as a miss.
    pub fn check(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = self.clock.now();
        let mut doomed = None;
        let found = {
            let mut inner = self.inner.lock();
            let state = match inner.entries.get(key) {
                None => None,
                Some(entry) if entry.is_expired(now) => Some(false),
                Some(entry) if !entry.file_path.is_file() => Some(false),
                Some(_) => Some(true),
            };
            match state {
                Some(true) => {
                    inner.hits += 1;
                    let entry = inner.entries.get_mut(key).map(|entry| {
                        entry.touch(now);
                        entry.clone()
                    });
                    if let Some(entry) = &entry {
                        self.persist(entry);
                    }
                    entry
                }
                Some(false) => {
                    inner.misses += 1;
                    if let Some(entry) = inner.entries.remove(key) {
                        if entry.is_expired(now) {
                            inner.expirations += 1;
                        }
                        self.unpersist(key);
                        doomed = Some(entry.file_path);
                    }
                    None
                }
                None => {
                    inner.misses += 1;
                    None
                }
            }
        };
        delete_files(doomed);
        match &found {
            Some(entry) => log::debug!(
                "[CACHE] Hit {} ({} accesses)",
                key.short(),
                entry.access_count
            ),
            None => log::debug!("[CACHE] Miss {}", key.short()),
        }
        found
    }

    /// Records a finished render under `key`, replacing any previous entry,
    /// then evicts least-recently-used entries down to capacity.
    pub fn save(
        &self,
        key: CacheKey,
        proposal_id: ProposalId,
        pdf: &RenderedPdf,
        metadata: serde_json::Value,
    ) -> CacheEntry {
        let now = self.clock.now();
        let entry = CacheEntry::new(
            key.clone(),
            proposal_id,
            pdf.method,
            pdf.path.clone(),
            pdf.size,
            now,
            self.settings.ttl,
        )
        .with_metadata(metadata);

        let mut doomed = Vec::new();
        {
            let mut inner = self.inner.lock();
            self.persist(&entry);
            if let Some(old) = inner.entries.insert(key.clone(), entry.clone()) {
                if old.file_path != entry.file_path {
                    doomed.push(old.file_path);
                }
            }
            doomed.extend(self.evict_locked(&mut inner, Some(&key)));
        }
        delete_files(doomed);
        log::debug!(
            "[CACHE] Saved {} -> {} ({} bytes)",
            key.short(),
            entry.file_path.display(),
            entry.file_size
        );
        entry
    }

    /// Evicts least-recently-used entries until the store is within
    /// capacity. Returns how many were evicted.
    pub fn evict_if_over_capacity(&self) -> usize {
        let doomed = {
            let mut inner = self.inner.lock();
            self.evict_locked(&mut inner, None)
        };
        let count = doomed.len();
        delete_files(doomed);
        count
    }

    /// Removes every entry in `scope` along with its file.
    pub fn clear(&self, scope: ClearScope<'_>) -> usize {
        let doomed: Vec<PathBuf> = {
            let mut inner = self.inner.lock();
            let keys: Vec<CacheKey> = inner
                .entries
                .values()
                .filter(|e| scope.matches(e))
                .map(|e| e.key.clone())
                .collect();
            keys.iter()
                .filter_map(|key| {
                    self.unpersist(key);
                    inner.entries.remove(key).map(|e| e.file_path)
                })
                .collect()
        };
        let count = doomed.len();
        delete_files(doomed);
        if count > 0 {
            log::info!("[CACHE] Cleared {} entries ({:?})", count, scope);
        }
        count
    }

    /// Removes every entry past its expiry time.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let doomed: Vec<PathBuf> = {
            let mut inner = self.inner.lock();
            let keys: Vec<CacheKey> = inner
                .entries
                .values()
                .filter(|e| e.is_expired(now))
                .map(|e| e.key.clone())
                .collect();
            inner.expirations += keys.len() as u64;
            keys.iter()
                .filter_map(|key| {
                    self.unpersist(key);
                    inner.entries.remove(key).map(|e| e.file_path)
                })
                .collect()
        };
        let count = doomed.len();
        delete_files(doomed);
        if count > 0 {
            log::info!("[CACHE] Purged {} expired entries", count);
        }
        count
    }

    /// Returns an entry without counting it as an access.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.lock().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            capacity: self.settings.max_capacity,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }

    pub fn flush(&self) {
        if let Err(e) = self.index.flush() {
            log::warn!("[CACHE] Failed to flush cache index: {}", e);
        }
    }

    /// Picks LRU victims while the lock is held. `keep` is never evicted.
    fn evict_locked(&self, inner: &mut Inner, keep: Option<&CacheKey>) -> Vec<PathBuf> {
        let excess = inner.entries.len().saturating_sub(self.settings.max_capacity);
        if excess == 0 {
            return Vec::new();
        }

        let mut order: Vec<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>, CacheKey)> =
            inner
                .entries
                .values()
                .filter(|e| Some(&e.key) != keep)
                .map(|e| (e.last_accessed_at, e.generated_at, e.key.clone()))
                .collect();
        order.sort();

        let mut doomed = Vec::with_capacity(excess);
        for (_, _, key) in order.into_iter().take(excess) {
            if let Some(entry) = inner.entries.remove(&key) {
                self.unpersist(&key);
                log::info!(
                    "[CACHE] Evicted {} for proposal '{}' (last access {})",
                    key.short(),
                    entry.proposal_id,
                    entry.last_accessed_at
                );
                doomed.push(entry.file_path);
            }
        }
        inner.evictions += doomed.len() as u64;
        doomed
    }

    fn persist(&self, entry: &CacheEntry) {
        if let Err(e) = self.index.put(entry) {
            log::warn!("[CACHE] Failed to persist entry {}: {}", entry.key.short(), e);
        }
    }

    fn unpersist(&self, key: &CacheKey) {
        if let Err(e) = self.index.remove(key) {
            log::warn!("[CACHE] Failed to remove index row {}: {}", key.short(), e);
        }
    }
}

fn delete_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("[CACHE] Failed to delete {}: {}", path.display(), e),
    }
}

fn delete_files(paths: impl IntoIterator<Item = PathBuf>) {
    for path in paths {
        delete_file(&path);
    }
}
