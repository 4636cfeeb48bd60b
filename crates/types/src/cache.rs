use crate::ids::{CacheKey, ProposalId};
use crate::options::RenderMethod;
use crate::time::after;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A cached generation result and its LRU bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: CacheKey,
    pub proposal_id: ProposalId,
    pub method: RenderMethod,
    pub file_path: PathBuf,
    pub file_size: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub generated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// A fresh entry generated at `now`, living for `ttl`.
    pub fn new(
        key: CacheKey,
        proposal_id: ProposalId,
        method: RenderMethod,
        file_path: PathBuf,
        file_size: u64,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            key,
            proposal_id,
            method,
            file_path,
            file_size,
            metadata: serde_json::Value::Null,
            generated_at: now,
            last_accessed_at: now,
            access_count: 0,
            expires_at: after(now, ttl),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Expired entries are never served. An entry expiring exactly at `now`
    /// counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Records a cache hit.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.access_count = self.access_count.saturating_add(1);
    }
}
