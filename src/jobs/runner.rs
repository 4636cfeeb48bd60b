// src/jobs/runner.rs
//! Executes one attempt of a job: fetch content, pick a method, render under
//! a hard timeout, populate the cache, report back to the queue.
//!
//! Shared by the worker pool and the synchronous path so both follow the
//! same progress, fallback and cache rules.

use crate::cache::CacheStore;
use crate::jobs::queue::{JobQueue, Lease};
use crate::selector::MethodSelector;
use quire_render_core::{OutputDir, RenderError, RenderedPdf, SharedRenderer, with_timeout};
use quire_traits::{ContentError, ContentSource};
use quire_types::{
    AttemptError, FailureKind, Job, JobResult, MethodPreference, ProposalContent, RenderMethod,
    ResolvedOptions,
};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

const PROGRESS_CONTENT_LOADED: u8 = 20;
const PROGRESS_RENDER_STARTED: u8 = 30;
const PROGRESS_RENDER_CEILING: u8 = 75;
const PROGRESS_RENDER_STEP: u8 = 5;
const PROGRESS_RENDERED: u8 = 80;
const PROGRESS_CACHED: u8 = 95;

/// The renderers available to the service, at most one per method.
#[derive(Debug, Clone, Default)]
pub struct RendererSet {
    browser: Option<SharedRenderer>,
    office: Option<SharedRenderer>,
}

impl RendererSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `renderer` under the method it reports.
    pub fn with(mut self, renderer: SharedRenderer) -> Self {
        match renderer.method() {
            RenderMethod::Browser => self.browser = Some(renderer),
            RenderMethod::Office => self.office = Some(renderer),
        }
        self
    }

    pub fn get(&self, method: RenderMethod) -> Option<&SharedRenderer> {
        match method {
            RenderMethod::Browser => self.browser.as_ref(),
            RenderMethod::Office => self.office.as_ref(),
        }
    }

    pub fn methods(&self) -> Vec<RenderMethod> {
        RenderMethod::ALL
            .into_iter()
            .filter(|m| self.get(*m).is_some())
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    pub render_timeout: Duration,
    pub base_delay: Duration,
    pub heartbeat_interval: Duration,
}

#[derive(Debug)]
pub struct JobRunner {
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) cache: Arc<CacheStore>,
    content: Arc<dyn ContentSource>,
    renderers: RendererSet,
    selector: MethodSelector,
    output: OutputDir,
    settings: RunnerSettings,
}

fn content_error(err: ContentError) -> AttemptError {
    match err {
        ContentError::NotFound(id) => {
            AttemptError::new(FailureKind::NotFound, format!("proposal '{}' not found", id))
        }
        other => AttemptError::new(FailureKind::Content, other.to_string()),
    }
}

fn render_error(err: &RenderError, method: RenderMethod) -> AttemptError {
    let kind = match err {
        RenderError::Unavailable { .. } => FailureKind::RendererUnavailable,
        RenderError::Timeout { .. } => FailureKind::RendererTimeout,
        _ => FailureKind::RendererFailure,
    };
    let error = AttemptError::new(kind, err.to_string()).with_method(err.method().unwrap_or(method));
    if kind == FailureKind::RendererUnavailable {
        error.with_suggestion(method.alternative())
    } else {
        error
    }
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("[RENDER] Failed to remove partial output {}: {}", path.display(), e),
    }
}

impl JobRunner {
    pub fn new(
        queue: Arc<JobQueue>,
        cache: Arc<CacheStore>,
        content: Arc<dyn ContentSource>,
        renderers: RendererSet,
        selector: MethodSelector,
        output: OutputDir,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            queue,
            cache,
            content,
            renderers,
            selector,
            output,
            settings,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn renderers(&self) -> &RendererSet {
        &self.renderers
    }

    pub fn settings(&self) -> RunnerSettings {
        self.settings
    }

    /// Runs the job's current attempt and records the outcome. Returns the
    /// job as the queue holds it afterwards.
    pub async fn process(&self, job: &Job) -> Option<Job> {
        let lease = Lease::of(job);
        let started = Instant::now();
        match self.execute(job, lease).await {
            Ok(result) => {
                log::info!(
                    "[RENDER] Job {} rendered via {} in {:?} ({} bytes)",
                    job.id,
                    result.method,
                    started.elapsed(),
                    result.file_size
                );
                self.queue.complete(lease, result)
            }
            Err(error) => self
                .queue
                .fail_attempt(lease, error, self.settings.base_delay)
                .map(|(_, job)| job),
        }
    }

    async fn execute(&self, job: &Job, lease: Lease) -> Result<JobResult, AttemptError> {
        // A stalled earlier attempt may have finished after all.
        if let Some(entry) = self.cache.check(&job.cache_key) {
            log::info!("[RENDER] Job {} satisfied from cache", job.id);
            return Ok(JobResult {
                file_path: entry.file_path,
                file_size: entry.file_size,
                method: entry.method,
            });
        }

        let content = self
            .heartbeat(lease, None, self.content.fetch_proposal_content(&job.request.proposal_id))
            .await
            .map_err(content_error)?;
        self.queue.set_progress(lease, PROGRESS_CONTENT_LOADED);

        let options = job.request.options;
        let method = self.selector.resolve(options.method, &content.signals());
        if options.method == MethodPreference::Auto {
            log::debug!(
                "[RENDER] Job {} auto-selected {} ({:?})",
                job.id,
                method,
                content.signals()
            );
        }

        let pdf = self.render(job, lease, &content, &options, method).await?;
        self.queue.set_progress(lease, PROGRESS_RENDERED);

        let metadata = serde_json::json!({
            "title": content.title,
            "sections": content.sections.len(),
            "visualizations": content.visualizations.len(),
            "options": options,
        });
        let entry = self.cache.save(
            job.cache_key.clone(),
            job.request.proposal_id.clone(),
            &pdf,
            metadata,
        );
        self.queue.set_progress(lease, PROGRESS_CACHED);

        Ok(JobResult {
            file_path: entry.file_path,
            file_size: entry.file_size,
            method: entry.method,
        })
    }

    /// Renders with `method`. Under `auto`, a missing tool switches to the
    /// other method within the same attempt.
    async fn render(
        &self,
        job: &Job,
        lease: Lease,
        content: &ProposalContent,
        options: &ResolvedOptions,
        method: RenderMethod,
    ) -> Result<RenderedPdf, AttemptError> {
        match self.render_once(job, lease, content, options, method).await {
            Err(err) if options.method == MethodPreference::Auto && !err.is_retryable() => {
                let fallback = method.alternative();
                log::warn!(
                    "[RENDER] Job {}: {}; falling back to {}",
                    job.id,
                    err,
                    fallback
                );
                self.render_once(job, lease, content, options, fallback)
                    .await
                    .map_err(|e| render_error(&e, fallback))
            }
            other => other.map_err(|e| render_error(&e, method)),
        }
    }

    async fn render_once(
        &self,
        job: &Job,
        lease: Lease,
        content: &ProposalContent,
        options: &ResolvedOptions,
        method: RenderMethod,
    ) -> Result<RenderedPdf, RenderError> {
        let renderer = self
            .renderers
            .get(method)
            .ok_or_else(|| RenderError::unavailable(method, "no renderer configured"))?;

        self.queue.set_method(lease, method);
        self.queue.set_progress(lease, PROGRESS_RENDER_STARTED);

        self.output.ensure()?;
        let path = self.output.allocate(job.cache_key.short());
        let rendered = self
            .heartbeat(
                lease,
                Some(PROGRESS_RENDER_STARTED),
                with_timeout(
                    method,
                    self.settings.render_timeout,
                    renderer.render(content, options, &path),
                ),
            )
            .await
            .and_then(|_| RenderedPdf::from_output(method, &path));

        if rendered.is_err() {
            discard(&path);
        }
        rendered
    }

    /// Drives `fut` while heartbeating the lease. With `creep` set, progress
    /// also inches up from that value on every beat.
    async fn heartbeat<F: Future>(&self, lease: Lease, creep: Option<u8>, fut: F) -> F::Output {
        tokio::pin!(fut);
        let period = self.settings.heartbeat_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.reset();
        let mut progress = creep;
        loop {
            tokio::select! {
                out = &mut fut => return out,
                _ = ticker.tick() => {
                    self.queue.heartbeat(lease);
                    if let Some(p) = progress.as_mut() {
                        *p = p.saturating_add(PROGRESS_RENDER_STEP).min(PROGRESS_RENDER_CEILING);
                        self.queue.set_progress(lease, *p);
                    }
                }
            }
        }
    }
}
