use quire_render_core::{PageSetup, RenderError};
use quire_types::ProposalContent;
use std::fmt::Debug;

/// Produces the word-processing document the office converter consumes.
pub trait DocumentBuilder: Send + Sync + Debug {
    /// File extension of the produced document, without the dot.
    fn extension(&self) -> &'static str;

    fn build(&self, content: &ProposalContent, setup: &PageSetup) -> Result<Vec<u8>, RenderError>;
}
