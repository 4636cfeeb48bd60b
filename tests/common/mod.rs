#![allow(dead_code)]

pub mod fixtures;

use async_trait::async_trait;
use quire::{
    Orchestrator, RenderError, RenderMethod, RenderedPdf, Renderer, ServiceConfig, SharedRenderer,
};
use quire_traits::{CacheIndex, InMemoryContentSource, JobTable};
use quire_types::{ProposalContent, ResolvedOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A renderer whose behaviour is scripted by the test: it can be slow, fail
/// a number of times, or report its tool as missing. Successful renders
/// write a small PDF stub to the requested path.
#[derive(Debug)]
pub struct ScriptedRenderer {
    method: RenderMethod,
    calls: AtomicUsize,
    failures_left: AtomicU32,
    unavailable: AtomicBool,
    delay: Duration,
    started: Mutex<Vec<Instant>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRenderer {
    pub fn new(method: RenderMethod) -> Arc<Self> {
        Self::with_delay(method, Duration::ZERO)
    }

    pub fn with_delay(method: RenderMethod, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            method,
            calls: AtomicUsize::new(0),
            failures_left: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
            delay,
            started: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// The next `n` renders fail with an ordinary renderer error.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// When each render began, on the tokio clock.
    pub fn start_times(&self) -> Vec<Instant> {
        self.started.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Most renders that were ever in progress at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Counts a render as in progress until dropped.
struct Active<'a>(&'a AtomicUsize);

impl<'a> Active<'a> {
    fn enter(active: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    fn method(&self) -> RenderMethod {
        self.method
    }

    async fn render(
        &self,
        content: &ProposalContent,
        _options: &ResolvedOptions,
        output: &Path,
    ) -> Result<RenderedPdf, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut started) = self.started.lock() {
            started.push(Instant::now());
        }
        let _active = Active::enter(&self.active, &self.peak);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RenderError::unavailable(self.method, "binary not found on PATH"));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RenderError::failed(self.method, "scripted failure"));
        }

        let body = format!("%PDF-1.7\n% {} via {}\n%%EOF\n", content.title, self.method);
        std::fs::write(output, body)?;
        RenderedPdf::from_output(self.method, output)
    }

    async fn probe(&self) -> Result<(), RenderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RenderError::unavailable(self.method, "binary not found on PATH"))
        } else {
            Ok(())
        }
    }
}

/// A configuration tuned for fast tests: millisecond backoff, no effective
/// start rate limit, files under `dir`.
pub fn test_config(dir: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.cache.output_dir = dir.join("pdf");
    config.cache.max_capacity = 100;
    config.queue.worker_count = 2;
    config.queue.max_attempts = 3;
    config.queue.base_delay_ms = 10;
    config.queue.rate_limit_starts = 1_000;
    config.queue.rate_limit_window_secs = 1;
    config.queue.heartbeat_interval_secs = 1;
    config.queue.stall_timeout_secs = 30;
    config.storage.path = dir.join("quire.db");
    config.storage.content_dir = dir.join("proposals");
    config
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub browser: Arc<ScriptedRenderer>,
    pub office: Arc<ScriptedRenderer>,
    pub content: Arc<InMemoryContentSource>,
    pub dir: TempDir,
}

impl Harness {
    /// In-memory stores, both scripted renderers, the standard fixtures
    /// loaded. Workers are not started.
    pub fn new() -> Self {
        Self::with(|config| config)
    }

    pub fn with(tweak: impl FnOnce(ServiceConfig) -> ServiceConfig) -> Self {
        init_logging();
        let dir = TempDir::new().expect("temp dir");
        let config = tweak(test_config(dir.path()));
        let browser = ScriptedRenderer::new(RenderMethod::Browser);
        let office = ScriptedRenderer::new(RenderMethod::Office);
        Self::assemble(dir, config, browser, office, None)
    }

    pub fn assemble(
        dir: TempDir,
        config: ServiceConfig,
        browser: Arc<ScriptedRenderer>,
        office: Arc<ScriptedRenderer>,
        stores: Option<(Arc<dyn CacheIndex>, Arc<dyn JobTable>)>,
    ) -> Self {
        let content = Arc::new(fixtures::content_source());
        let mut builder = Orchestrator::builder(config)
            .with_content_source(content.clone())
            .with_renderer(browser.clone() as SharedRenderer)
            .with_renderer(office.clone() as SharedRenderer);
        if let Some((index, table)) = stores {
            builder = builder.with_cache_index(index).with_job_table(table);
        }
        let orchestrator = builder.build().expect("orchestrator");
        Self {
            orchestrator,
            browser,
            office,
            content,
            dir,
        }
    }

    pub fn total_renders(&self) -> usize {
        self.browser.calls() + self.office.calls()
    }

    pub fn pdf_files(&self) -> Vec<std::path::PathBuf> {
        match std::fs::read_dir(self.dir.path().join("pdf")) {
            Ok(entries) => entries.filter_map(|e| e.ok().map(|e| e.path())).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn insert(&self, content: ProposalContent) {
        self.content.insert(content).expect("insert proposal");
    }
}

/// Bounds a test step so a regression hangs for seconds, not forever.
pub async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("timed out")
}
