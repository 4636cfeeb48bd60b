use crate::engine::BrowserEngine;
use crate::pool::PagePool;
use async_trait::async_trait;
use quire_render_core::{PageSetup, RenderError, RenderedPdf, Renderer, html, with_timeout};
use quire_types::{ProposalContent, RenderMethod, ResolvedOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// The browser-based adapter: full CSS and graphics fidelity.
#[derive(Debug)]
pub struct BrowserRenderer<E: BrowserEngine> {
    pool: Arc<PagePool<E>>,
    timeout: Duration,
}

impl<E: BrowserEngine> BrowserRenderer<E> {
    pub fn new(engine: E, pool_size: usize, timeout: Duration) -> Self {
        Self {
            pool: Arc::new(PagePool::new(Arc::new(engine), pool_size)),
            timeout,
        }
    }

    pub fn pool(&self) -> &Arc<PagePool<E>> {
        &self.pool
    }
}

#[async_trait]
impl<E: BrowserEngine> Renderer for BrowserRenderer<E> {
    fn method(&self) -> RenderMethod {
        RenderMethod::Browser
    }

    async fn render(
        &self,
        content: &ProposalContent,
        options: &ResolvedOptions,
        output: &Path,
    ) -> Result<RenderedPdf, RenderError> {
        let setup = PageSetup::from_options(options);
        let document = html::document(content, &setup);

        with_timeout(RenderMethod::Browser, self.timeout, async {
            let mut lease = self.pool.lease().await?;
            let page = lease
                .page_mut()
                .ok_or_else(|| RenderError::failed(RenderMethod::Browser, "lease has no page"))?;
            self.pool
                .engine()
                .print_pdf(page, &document, &setup, output)
                .await?;
            lease.release();
            RenderedPdf::from_output(RenderMethod::Browser, output)
        })
        .await
    }

    async fn probe(&self) -> Result<(), RenderError> {
        self.pool.engine().probe().await
    }
}
