//! ContentSource trait for abstracting proposal loading.
//!
//! The generation service never talks to the proposal database directly; it
//! asks a `ContentSource` for the sections, branding and visualizations of a
//! proposal and hands the result to a renderer.

use async_trait::async_trait;
use quire_types::{ProposalContent, ProposalId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::RwLock;
use thiserror::Error;

/// Error type for content loading operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("Proposal not found: {0}")]
    NotFound(ProposalId),

    #[error("Failed to load proposal '{id}': {message}")]
    LoadFailed { id: ProposalId, message: String },

    #[error("Invalid proposal record: {0}")]
    InvalidFormat(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ContentError {
    fn from(err: std::io::Error) -> Self {
        ContentError::Io(err.to_string())
    }
}

/// Loads proposal content by id.
///
/// # Implementations
///
/// - `InMemoryContentSource`: pre-populated records (tests, embedders)
/// - `FilesystemContentSource` in `quire-store`: one JSON file per proposal
#[async_trait]
pub trait ContentSource: Send + Sync + Debug {
    /// Fetch the full content of a proposal.
    ///
    /// Returns `ContentError::NotFound` for an unknown id; any other error is
    /// treated as transient by the job queue.
    async fn fetch_proposal_content(&self, id: &ProposalId) -> Result<ProposalContent, ContentError>;

    /// Returns a human-readable name for this source (for logging/debugging).
    fn name(&self) -> &'static str;
}

/// An in-memory content source.
#[derive(Debug, Default)]
pub struct InMemoryContentSource {
    proposals: RwLock<HashMap<ProposalId, ProposalContent>>,
}

impl InMemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a proposal. The record's own `proposal_id` is the key.
    ///
    /// # Errors
    ///
    /// Returns `ContentError::LoadFailed` if the internal lock is poisoned.
    pub fn insert(&self, content: ProposalContent) -> Result<(), ContentError> {
        let id = content.proposal_id.clone();
        let mut proposals = self.proposals.write().map_err(|_| ContentError::LoadFailed {
            id: id.clone(),
            message: "content store lock poisoned".to_string(),
        })?;
        proposals.insert(id, content);
        Ok(())
    }

    /// Remove a proposal.
    ///
    /// Returns `None` if the lock is poisoned or the proposal doesn't exist.
    pub fn remove(&self, id: &ProposalId) -> Option<ProposalContent> {
        self.proposals.write().ok()?.remove(id)
    }

    /// Returns 0 if the lock is poisoned.
    pub fn len(&self) -> usize {
        self.proposals.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentSource for InMemoryContentSource {
    async fn fetch_proposal_content(&self, id: &ProposalId) -> Result<ProposalContent, ContentError> {
        let proposals = self.proposals.read().map_err(|_| ContentError::LoadFailed {
            id: id.clone(),
            message: "content store lock poisoned".to_string(),
        })?;
        proposals
            .get(id)
            .cloned()
            .ok_or_else(|| ContentError::NotFound(id.clone()))
    }

    fn name(&self) -> &'static str {
        "InMemoryContentSource"
    }
}
