//! Filesystem-based content source.
//!
//! Proposal records are JSON files named after the proposal id. Ids are
//! validated before they are turned into a path so that a crafted id can
//! never address a file outside the base directory.

use async_trait::async_trait;
use quire_traits::{ContentError, ContentSource};
use quire_types::{ProposalContent, ProposalId};
use std::path::{Component, Path, PathBuf};

/// A content source that loads `<base>/<proposal_id>.json`.
#[derive(Debug)]
pub struct FilesystemContentSource {
    base_path: PathBuf,
}

impl FilesystemContentSource {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base_path
    }

    /// Returns `None` if the id would escape the base directory.
    fn record_path(&self, id: &ProposalId) -> Option<PathBuf> {
        let id = id.as_str();
        if id.is_empty() || id.contains(['/', '\\']) {
            return None;
        }
        let file = format!("{}.json", id);
        let mut components = Path::new(&file).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(self.base_path.join(file)),
            _ => None,
        }
    }
}

#[async_trait]
impl ContentSource for FilesystemContentSource {
    async fn fetch_proposal_content(&self, id: &ProposalId) -> Result<ProposalContent, ContentError> {
        let path = self
            .record_path(id)
            .ok_or_else(|| ContentError::NotFound(id.clone()))?;

        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ContentError::NotFound(id.clone())
            } else {
                ContentError::LoadFailed {
                    id: id.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let mut content: ProposalContent = serde_json::from_slice(&bytes)
            .map_err(|e| ContentError::InvalidFormat(format!("{}: {}", path.display(), e)))?;

        if content.proposal_id.as_str().is_empty() {
            content.proposal_id = id.clone();
        } else if content.proposal_id != *id {
            log::warn!(
                "[CONTENT] {} declares proposalId '{}', expected '{}'",
                path.display(),
                content.proposal_id,
                id
            );
            content.proposal_id = id.clone();
        }
        Ok(content)
    }

    fn name(&self) -> &'static str {
        "FilesystemContentSource"
    }
}
