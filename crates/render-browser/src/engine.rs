use async_trait::async_trait;
use quire_render_core::{PageSetup, RenderError};
use std::fmt::Debug;
use std::path::Path;

/// The browser automation collaborator.
///
/// A `Page` is whatever reusable unit the engine hands out, typically a tab
/// in a long-lived browser. Pages never leave the browser crate.
#[async_trait]
pub trait BrowserEngine: Send + Sync + Debug + 'static {
    type Page: Send + 'static;

    async fn open_page(&self) -> Result<Self::Page, RenderError>;

    /// Load `html` into `page` and print it to `output`.
    async fn print_pdf(
        &self,
        page: &mut Self::Page,
        html: &str,
        setup: &PageSetup,
        output: &Path,
    ) -> Result<(), RenderError>;

    /// Whether a page that just finished a print may be reused.
    fn is_reusable(&self, _page: &Self::Page) -> bool {
        true
    }

    /// Checks that the engine can be started at all.
    async fn probe(&self) -> Result<(), RenderError>;
}
