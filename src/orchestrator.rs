// src/orchestrator.rs
//! The public entry point.
//!
//! The orchestrator owns the cache store, the job queue and the worker
//! pool, and composes them into the asynchronous (`generate`) and
//! synchronous (`generate_sync`) request paths. Storage, content and the
//! rendering backends are injected through [`OrchestratorBuilder`].

use crate::cache::{CacheSettings, CacheStats, CacheStore, ClearScope, cache_key};
use crate::clock::RuntimeClock;
use crate::config::ServiceConfig;
use crate::error::GenerationError;
use crate::jobs::{
    Admission, CancelOutcome, JobQueue, JobRunner, PoolSettings, QueueDepth, RendererSet,
    RunnerSettings, WorkerPool,
};
use crate::selector::MethodSelector;
use parking_lot::Mutex;
use quire_render_browser::{BrowserRenderer, ChromiumEngine};
use quire_render_core::{OutputDir, SharedRenderer};
use quire_render_office::{DocxBuilder, OfficeRenderer};
use quire_store::{FilesystemContentSource, SledStore};
use quire_traits::{
    CacheIndex, ContentSource, InMemoryCacheIndex, InMemoryJobTable, JobTable, SharedClock,
};
use quire_types::{
    GenerationOptions, GenerationRequest, Job, JobId, JobResult, JobState, MethodCapabilities,
    ProposalId, RenderMethod,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Caller-facing job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl From<JobState> for Status {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Queued => Status::Queued,
            JobState::Active => Status::Processing,
            JobState::Completed => Status::Completed,
            JobState::Failed => Status::Failed,
        }
    }
}

/// Answer to [`Orchestrator::generate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Absent when the request was answered from the cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub status: Status,
    pub method: RenderMethod,
    pub estimated_time_ms: u64,
    pub cached: bool,
    /// True when the request joined a job already running for the same output.
    pub attached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

/// Answer to [`Orchestrator::generate_sync`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub file_path: PathBuf,
    pub file_size: u64,
    pub method: RenderMethod,
    pub cached: bool,
}

impl SyncResult {
    fn from_job(result: JobResult, cached: bool) -> Self {
        Self {
            file_path: result.file_path,
            file_size: result.file_size,
            method: result.method,
            cached,
        }
    }
}

/// Answer to [`Orchestrator::get_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub job_id: JobId,
    pub proposal_id: ProposalId,
    pub state: Status,
    pub progress: u8,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<RenderMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cancel_requested: bool,
}

impl From<&Job> for StatusReport {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            proposal_id: job.request.proposal_id.clone(),
            state: job.state.into(),
            progress: job.progress,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            method: job.method,
            file_path: job.result.as_ref().map(|r| r.file_path.clone()),
            file_size: job.result.as_ref().map(|r| r.file_size),
            error: job.failure.as_ref().map(ToString::to_string),
            cancel_requested: job.cancel_requested,
        }
    }
}

pub struct OrchestratorBuilder {
    config: ServiceConfig,
    content: Option<Arc<dyn ContentSource>>,
    renderers: RendererSet,
    cache_index: Option<Arc<dyn CacheIndex>>,
    job_table: Option<Arc<dyn JobTable>>,
    clock: Option<SharedClock>,
}

impl OrchestratorBuilder {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            content: None,
            renderers: RendererSet::new(),
            cache_index: None,
            job_table: None,
            clock: None,
        }
    }

    pub fn with_content_source(mut self, content: Arc<dyn ContentSource>) -> Self {
        self.content = Some(content);
        self
    }

    /// Registers a renderer for the method it reports, replacing any earlier
    /// one for that method.
    pub fn with_renderer(mut self, renderer: SharedRenderer) -> Self {
        self.renderers = self.renderers.with(renderer);
        self
    }

    pub fn with_cache_index(mut self, index: Arc<dyn CacheIndex>) -> Self {
        self.cache_index = Some(index);
        self
    }

    pub fn with_job_table(mut self, table: Arc<dyn JobTable>) -> Self {
        self.job_table = Some(table);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Wires the production collaborators named by the config: the sled
    /// database, the proposal directory, headless Chromium and soffice.
    pub fn with_config_backends(mut self) -> Result<Self, GenerationError> {
        let store = SledStore::open(&self.config.storage.path)?;
        self.cache_index = Some(Arc::new(store.cache_index()?));
        self.job_table = Some(Arc::new(store.job_table()?));
        self.content = Some(Arc::new(FilesystemContentSource::new(
            &self.config.storage.content_dir,
        )));

        let renderer = &self.config.renderer;
        let chromium = ChromiumEngine::new(&renderer.chromium_path)
            .with_args(renderer.chromium_args.iter().cloned());
        let browser = BrowserRenderer::new(chromium, renderer.browser_pool_size, renderer.timeout());
        let office = OfficeRenderer::new(
            Arc::new(DocxBuilder::new()),
            &renderer.soffice_path,
            renderer.timeout(),
        );
        self.renderers = self
            .renderers
            .with(Arc::new(browser))
            .with(Arc::new(office));
        Ok(self)
    }

    /// Opens the stores and rebuilds cache and queue state from them.
    /// Workers are not started until [`Orchestrator::start`].
    pub fn build(self) -> Result<Orchestrator, GenerationError> {
        self.config.validate()?;
        let content = self.content.ok_or_else(|| {
            GenerationError::Config("no content source configured".to_string())
        })?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(RuntimeClock::new()));
        let cache_index = self
            .cache_index
            .unwrap_or_else(|| Arc::new(InMemoryCacheIndex::new()));
        let job_table = self
            .job_table
            .unwrap_or_else(|| Arc::new(InMemoryJobTable::new()));
        let config = self.config;

        let cache = Arc::new(CacheStore::open(
            cache_index,
            clock.clone(),
            CacheSettings {
                max_capacity: config.cache.max_capacity,
                ttl: config.cache.ttl(),
            },
        )?);
        let queue = Arc::new(JobQueue::open(job_table, clock)?);
        let selector = MethodSelector::new(config.selector.section_threshold);
        let runner = Arc::new(JobRunner::new(
            queue.clone(),
            cache.clone(),
            content.clone(),
            self.renderers,
            selector,
            OutputDir::new(&config.cache.output_dir),
            RunnerSettings {
                render_timeout: config.renderer.timeout(),
                base_delay: config.queue.base_delay(),
                heartbeat_interval: config.queue.heartbeat_interval(),
            },
        ));

        Ok(Orchestrator {
            pool_settings: PoolSettings {
                worker_count: config.queue.worker_count,
                rate_limit_starts: config.queue.rate_limit_starts,
                rate_limit_window: config.queue.rate_limit_window(),
                stall_timeout: config.queue.stall_timeout(),
                purge_interval: config.cache.purge_interval(),
                completed_retention: config.queue.completed_retention(),
                failed_retention: config.queue.failed_retention(),
            },
            sync_permits: Arc::new(Semaphore::new(config.queue.sync_max_concurrency)),
            max_attempts: config.queue.max_attempts,
            cache,
            queue,
            runner,
            content,
            selector,
            pool: Mutex::new(None),
        })
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    cache: Arc<CacheStore>,
    queue: Arc<JobQueue>,
    runner: Arc<JobRunner>,
    content: Arc<dyn ContentSource>,
    selector: MethodSelector,
    sync_permits: Arc<Semaphore>,
    max_attempts: u32,
    pool_settings: PoolSettings,
    pool: Mutex<Option<WorkerPool>>,
}

impl Orchestrator {
    pub fn builder(config: ServiceConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Starts the worker pool and background maintenance. Must be called
    /// from within a tokio runtime; calling it twice is a no-op.
    pub fn start(&self) {
        let mut pool = self.pool.lock();
        if pool.is_none() {
            *pool = Some(WorkerPool::start(
                self.runner.clone(),
                self.cache.clone(),
                self.pool_settings,
            ));
        }
    }

    pub fn is_running(&self) -> bool {
        self.pool.lock().is_some()
    }

    /// Stops the workers (letting in-progress renders finish) and flushes
    /// the persisted tables.
    pub async fn shutdown(&self) {
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.shutdown().await;
        }
        self.cache.flush();
        self.queue.flush();
    }

    /// Requests a PDF without waiting for it.
    ///
    /// A cache hit is answered immediately. Otherwise the request joins the
    /// job already producing the same output, or a new job is queued.
    pub async fn generate(
        &self,
        proposal_id: impl Into<ProposalId>,
        options: &GenerationOptions,
    ) -> Result<GenerateResponse, GenerationError> {
        let request = Self::request(proposal_id, options)?;
        let key = cache_key(&request);

        if let Some(entry) = self.cache.check(&key) {
            log::info!("[ORCHESTRATOR] Cache hit for proposal '{}'", request.proposal_id);
            return Ok(GenerateResponse {
                job_id: None,
                status: Status::Completed,
                method: entry.method,
                estimated_time_ms: 0,
                cached: true,
                attached: false,
                result: Some(JobResult {
                    file_path: entry.file_path,
                    file_size: entry.file_size,
                    method: entry.method,
                }),
            });
        }

        if let Some(job) = self.queue.in_flight(&key) {
            return Ok(self.attached_response(&job, None));
        }

        let content = self
            .content
            .fetch_proposal_content(&request.proposal_id)
            .await?;
        let method = self.selector.resolve(request.options.method, &content.signals());

        match self.queue.enqueue(request, key, self.max_attempts) {
            Admission::Attached(job) => Ok(self.attached_response(&job, Some(method))),
            Admission::Created(job) => Ok(GenerateResponse {
                job_id: Some(job.id),
                status: job.state.into(),
                method,
                estimated_time_ms: self.estimate_ms(method),
                cached: false,
                attached: false,
                result: None,
            }),
        }
    }

    fn request(
        proposal_id: impl Into<ProposalId>,
        options: &GenerationOptions,
    ) -> Result<GenerationRequest, GenerationError> {
        let request = GenerationRequest::new(proposal_id, options);
        if request.proposal_id.as_str().is_empty() {
            return Err(GenerationError::InvalidOptions("proposal id is empty".to_string()));
        }
        if !request.options.margins.is_valid() {
            return Err(GenerationError::InvalidOptions(format!(
                "margins must be finite and non-negative: {:?}",
                request.options.margins
            )));
        }
        Ok(request)
    }

    fn attached_response(&self, job: &Job, planned: Option<RenderMethod>) -> GenerateResponse {
        let method = job
            .method
            .or(planned)
            .or(job.request.options.method.explicit())
            .unwrap_or(RenderMethod::Browser);
        log::info!(
            "[ORCHESTRATOR] Proposal '{}' attached to in-flight job {}",
            job.request.proposal_id,
            job.id
        );
        GenerateResponse {
            job_id: Some(job.id),
            status: job.state.into(),
            method,
            estimated_time_ms: self.estimate_ms(method),
            cached: false,
            attached: true,
            result: job.result.clone(),
        }
    }

    /// Midpoint of the method's typical render time, stretched by the
    /// number of jobs ahead per worker.
    fn estimate_ms(&self, method: RenderMethod) -> u64 {
        let base = MethodCapabilities::of(method).estimated_time_range.midpoint_ms();
        let QueueDepth { queued, active } = self.queue.depth();
        let workers = self.pool_settings.worker_count.max(1) as u64;
        let ahead = (queued + active) as u64;
        base.saturating_add(base.saturating_mul(ahead) / workers)
    }

    /// Produces a PDF while the caller waits.
    ///
    /// Still consults and fills the cache, and joins any job already running
    /// for the same output instead of rendering twice.
    pub async fn generate_sync(
        &self,
        proposal_id: impl Into<ProposalId>,
        options: &GenerationOptions,
    ) -> Result<SyncResult, GenerationError> {
        let request = Self::request(proposal_id, options)?;
        let key = cache_key(&request);

        if let Some(entry) = self.cache.check(&key) {
            return Ok(SyncResult {
                file_path: entry.file_path,
                file_size: entry.file_size,
                method: entry.method,
                cached: true,
            });
        }
        if let Some(job) = self.queue.in_flight(&key) {
            return self.await_job(&job.id).await.map(|r| SyncResult::from_job(r, false));
        }

        let _permit = self
            .sync_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GenerationError::Overloaded("synchronous path is shut down".to_string()))?;

        // Another caller may have finished this output while we queued.
        if let Some(entry) = self.cache.check(&key) {
            return Ok(SyncResult {
                file_path: entry.file_path,
                file_size: entry.file_size,
                method: entry.method,
                cached: true,
            });
        }

        match self.queue.begin_inline(request, key) {
            Admission::Attached(job) => {
                self.await_job(&job.id).await.map(|r| SyncResult::from_job(r, false))
            }
            Admission::Created(job) => {
                let settled = self.runner.process(&job).await.ok_or_else(|| {
                    GenerationError::NotFound(format!("job {} vanished while running", job.id))
                })?;
                Self::job_outcome(&settled).map(|r| SyncResult::from_job(r, false))
            }
        }
    }

    fn job_outcome(job: &Job) -> Result<JobResult, GenerationError> {
        match (&job.result, &job.failure) {
            (Some(result), _) if job.state == JobState::Completed => Ok(result.clone()),
            (_, Some(failure)) => Err(GenerationError::from_failure(failure, job.inline)),
            _ => Err(GenerationError::RendererFailure(format!(
                "job {} ended in state {}",
                job.id, job.state
            ))),
        }
    }

    async fn await_job(&self, id: &JobId) -> Result<JobResult, GenerationError> {
        let job = self
            .queue
            .wait(id)
            .await
            .ok_or_else(|| GenerationError::NotFound(format!("job {} was cancelled or purged", id)))?;
        Self::job_outcome(&job)
    }

    /// Waits until the job is `Completed` or `Failed`. Only meaningful while
    /// the workers are running.
    pub async fn wait(&self, job_id: &JobId) -> Result<JobResult, GenerationError> {
        self.await_job(job_id).await
    }

    pub fn get_status(&self, job_id: &JobId) -> Result<StatusReport, GenerationError> {
        self.queue
            .get(job_id)
            .map(|job| StatusReport::from(&job))
            .ok_or_else(|| GenerationError::NotFound(format!("job {}", job_id)))
    }

    /// Removes every cached PDF of a proposal. Returns how many entries were
    /// removed.
    pub fn clear_cache(&self, proposal_id: &ProposalId) -> usize {
        self.cache.clear(ClearScope::Proposal(proposal_id))
    }

    pub fn clear_all(&self) -> usize {
        self.cache.clear(ClearScope::All)
    }

    pub fn cancel(&self, job_id: &JobId) -> Result<CancelOutcome, GenerationError> {
        self.queue
            .cancel(job_id)
            .ok_or_else(|| GenerationError::NotFound(format!("job {}", job_id)))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn queue_depth(&self) -> QueueDepth {
        self.queue.depth()
    }

    /// Static descriptor of every rendering method.
    pub fn get_capabilities(&self) -> BTreeMap<RenderMethod, MethodCapabilities> {
        capabilities()
    }

    /// Probes each configured renderer's external tool.
    pub async fn check_renderers(&self) -> BTreeMap<RenderMethod, Result<(), String>> {
        let mut report = BTreeMap::new();
        for method in RenderMethod::ALL {
            let outcome = match self.runner.renderers().get(method) {
                Some(renderer) => renderer.probe().await.map_err(|e| e.to_string()),
                None => Err("no renderer configured".to_string()),
            };
            report.insert(method, outcome);
        }
        report
    }
}

/// The per-method capability table.
pub fn capabilities() -> BTreeMap<RenderMethod, MethodCapabilities> {
    RenderMethod::ALL
        .into_iter()
        .map(|method| (method, *MethodCapabilities::of(method)))
        .collect()
}
