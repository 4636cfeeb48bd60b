use crate::engine::BrowserEngine;
use quire_render_core::RenderError;
use quire_types::RenderMethod;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A bounded pool of browser pages.
///
/// At most `size` pages exist at once: a lease holds a semaphore permit for
/// as long as it holds its page. Released pages go back on the idle stack;
/// a lease dropped without [`PageLease::release`] (failed or timed-out
/// render) discards its page.
pub struct PagePool<E: BrowserEngine> {
    engine: Arc<E>,
    idle: Mutex<Vec<E::Page>>,
    permits: Arc<Semaphore>,
    size: usize,
    opened: AtomicUsize,
}

impl<E: BrowserEngine> std::fmt::Debug for PagePool<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagePool")
            .field("engine", &self.engine)
            .field("size", &self.size)
            .field("idle", &self.idle_count())
            .field("opened", &self.opened_count())
            .finish()
    }
}

impl<E: BrowserEngine> PagePool<E> {
    pub fn new(engine: Arc<E>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            engine,
            idle: Mutex::new(Vec::with_capacity(size)),
            permits: Arc::new(Semaphore::new(size)),
            size,
            opened: AtomicUsize::new(0),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Pages opened over the pool's lifetime.
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    /// Waits for a free slot, then hands out an idle page or opens a new one.
    pub async fn lease(self: &Arc<Self>) -> Result<PageLease<E>, RenderError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RenderError::failed(RenderMethod::Browser, "page pool closed"))?;

        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let page = match reused {
            Some(page) => page,
            None => {
                let page = self.engine.open_page().await?;
                let opened = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("[RENDER] Opened browser page ({} total)", opened);
                page
            }
        };

        Ok(PageLease {
            pool: Arc::clone(self),
            page: Some(page),
            _permit: permit,
        })
    }

    fn give_back(&self, page: E::Page) {
        if !self.engine.is_reusable(&page) {
            log::debug!("[RENDER] Retiring browser page");
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(page);
        }
    }
}

/// Exclusive use of one pooled page.
pub struct PageLease<E: BrowserEngine> {
    pool: Arc<PagePool<E>>,
    page: Option<E::Page>,
    _permit: OwnedSemaphorePermit,
}

impl<E: BrowserEngine> PageLease<E> {
    pub fn page_mut(&mut self) -> Option<&mut E::Page> {
        self.page.as_mut()
    }

    /// Returns the page to the pool for reuse.
    pub fn release(mut self) {
        if let Some(page) = self.page.take() {
            self.pool.give_back(page);
        }
    }
}
