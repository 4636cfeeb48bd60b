use crate::error::RenderError;
use crate::output::RenderedPdf;
use async_trait::async_trait;
use quire_types::{ProposalContent, RenderMethod, ResolvedOptions};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

/// A rendering backend: turns proposal content into a PDF file.
///
/// Implementations own their external resources (processes, browser pages)
/// and must never leak them to the caller. Each call writes to the `output`
/// path it is given and nowhere else, so concurrent renders cannot collide.
#[async_trait]
pub trait Renderer: Send + Sync + Debug {
    fn method(&self) -> RenderMethod;

    /// Render `content` to `output`, enforcing the backend's hard timeout.
    async fn render(
        &self,
        content: &ProposalContent,
        options: &ResolvedOptions,
        output: &Path,
    ) -> Result<RenderedPdf, RenderError>;

    /// Checks that the backend's external tool can be started.
    async fn probe(&self) -> Result<(), RenderError> {
        Ok(())
    }
}

pub type SharedRenderer = Arc<dyn Renderer>;
