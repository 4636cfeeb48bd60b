// src/jobs/queue.rs
//! The durable job queue.
//!
//! Jobs live in an in-memory table guarded by one mutex and are written
//! through to a [`JobTable`] on every transition. The same critical section
//! maintains the single-flight map from cache key to the job currently
//! producing it, so admitting a job and detecting a duplicate are one atomic
//! step.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quire_traits::{JobTable, SharedClock, StoreError};
use quire_types::{
    AttemptError, CacheKey, GenerationRequest, Job, JobId, JobResult, JobState, RenderMethod,
    RetryDecision,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Identifies one attempt of one job. Updates carrying a stale attempt
/// number (from a worker whose job was already reaped) are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lease {
    pub id: JobId,
    pub attempt: u32,
}

impl Lease {
    pub fn of(job: &Job) -> Self {
        Self {
            id: job.id,
            attempt: job.attempts,
        }
    }
}

/// Result of asking the queue to take on work for a cache key.
#[derive(Debug, Clone)]
pub enum Admission {
    /// A new job was created.
    Created(Job),
    /// A job for the same cache key is already queued or running.
    Attached(Job),
}

impl Admission {
    pub fn job(&self) -> &Job {
        match self {
            Admission::Created(job) | Admission::Attached(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            Admission::Created(job) | Admission::Attached(job) => job,
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self, Admission::Attached(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum CancelOutcome {
    /// The job was still queued and has been deleted.
    Removed,
    /// The job is already rendering; it will finish and populate the cache,
    /// but nobody is waiting for it any more.
    Detached,
    /// Nothing to cancel.
    AlreadyFinished { state: JobState },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    pub queued: usize,
    pub active: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    /// Claimable jobs ordered by (available_at, seq).
    ready: BTreeSet<(DateTime<Utc>, u64, JobId)>,
    in_flight: HashMap<CacheKey, JobId>,
    next_seq: u64,
}

impl QueueState {
    fn insert(&mut self, job: Job) {
        if job.state == JobState::Queued {
            self.ready.insert((job.available_at, job.seq, job.id));
        }
        if !job.state.is_terminal() {
            self.in_flight.insert(job.cache_key.clone(), job.id);
        }
        self.jobs.insert(job.id, job);
    }

    fn release_key(&mut self, job: &Job) {
        if self.in_flight.get(&job.cache_key) == Some(&job.id) {
            self.in_flight.remove(&job.cache_key);
        }
    }

    fn active_lease(&mut self, lease: Lease) -> Option<&mut Job> {
        self.jobs
            .get_mut(&lease.id)
            .filter(|job| job.state == JobState::Active && job.attempts == lease.attempt)
    }
}

#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    table: Arc<dyn JobTable>,
    clock: SharedClock,
    /// Signalled when a job becomes claimable.
    ready: Notify,
    /// Signalled when a job settles or disappears.
    settled: Notify,
}

impl JobQueue {
    /// Rebuilds the queue from its persisted table. Jobs a previous process
    /// left `Active` are treated as stalled: requeued if they have attempts
    /// left, failed otherwise.
    pub fn open(table: Arc<dyn JobTable>, clock: SharedClock) -> Result<Self, StoreError> {
        let mut rows = table.load_all()?;
        rows.sort_by_key(|job| job.seq);

        let now = clock.now();
        let mut state = QueueState::default();
        let mut requeued = 0usize;
        for mut job in rows {
            state.next_seq = state.next_seq.max(job.seq + 1);
            if job.state == JobState::Active {
                job.requeue_stalled(now);
                requeued += 1;
                if let Err(e) = table.put(&job) {
                    log::warn!("[QUEUE] Failed to persist recovered job {}: {}", job.id, e);
                }
            }
            if !job.state.is_terminal() {
                if let Some(other) = state.in_flight.get(&job.cache_key) {
                    log::warn!(
                        "[QUEUE] Job {} duplicates in-flight job {} for key {}; failing it",
                        job.id,
                        other,
                        job.cache_key.short()
                    );
                    job.fail(
                        quire_types::JobFailure {
                            error: AttemptError::new(
                                quire_types::FailureKind::RendererFailure,
                                "superseded by another job for the same output",
                            ),
                            attempts: job.attempts,
                            exhausted: false,
                        },
                        now,
                    );
                    if let Err(e) = table.put(&job) {
                        log::warn!("[QUEUE] Failed to persist job {}: {}", job.id, e);
                    }
                }
            }
            state.insert(job);
        }
        log::info!(
            "[QUEUE] Recovered {} jobs ({} queued, {} requeued after a restart)",
            state.jobs.len(),
            state.ready.len(),
            requeued
        );

        Ok(Self {
            state: Mutex::new(state),
            table,
            clock,
            ready: Notify::new(),
            settled: Notify::new(),
        })
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn persist(&self, job: &Job) {
        if let Err(e) = self.table.put(job) {
            log::warn!("[QUEUE] Failed to persist job {}: {}", job.id, e);
        }
    }

    fn unpersist(&self, id: &JobId) {
        if let Err(e) = self.table.remove(id) {
            log::warn!("[QUEUE] Failed to delete job {}: {}", id, e);
        }
    }

    /// Queues a job for `key`, or attaches to the job already producing it.
    pub fn enqueue(&self, request: GenerationRequest, key: CacheKey, max_attempts: u32) -> Admission {
        let admission = {
            let mut state = self.state.lock();
            if let Some(existing) = state.in_flight.get(&key).and_then(|id| state.jobs.get(id)) {
                return Admission::Attached(existing.clone());
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            let job = Job::new(request, key, max_attempts, seq, self.clock.now());
            self.persist(&job);
            state.insert(job.clone());
            Admission::Created(job)
        };
        let job = admission.job();
        log::info!(
            "[QUEUE] Job {} queued for proposal '{}' (key {})",
            job.id,
            job.request.proposal_id,
            job.cache_key.short()
        );
        self.ready.notify_one();
        admission
    }

    /// Registers a job that the caller will run itself, bypassing the
    /// workers. The job starts `Active` with a single attempt. If the key is
    /// already in flight, the existing job is returned instead.
    pub fn begin_inline(&self, request: GenerationRequest, key: CacheKey) -> Admission {
        let mut state = self.state.lock();
        if let Some(existing) = state.in_flight.get(&key).and_then(|id| state.jobs.get(id)) {
            return Admission::Attached(existing.clone());
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let now = self.clock.now();
        let mut job = Job::new(request, key, 1, seq, now);
        job.inline = true;
        job.begin_attempt(now);
        self.persist(&job);
        state.insert(job.clone());
        log::info!(
            "[QUEUE] Job {} running inline for proposal '{}'",
            job.id,
            job.request.proposal_id
        );
        Admission::Created(job)
    }

    /// Claims the oldest ready job, moving it to `Active`.
    pub fn claim_next(&self) -> Option<Job> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let &(available_at, seq, id) = state.ready.first()?;
        if available_at > now {
            return None;
        }
        state.ready.remove(&(available_at, seq, id));
        let job = state.jobs.get_mut(&id)?;
        job.begin_attempt(now);
        let job = job.clone();
        self.persist(&job);
        Some(job)
    }

    /// When the next queued job becomes claimable, if any is queued.
    pub fn next_ready_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().ready.first().map(|(at, _, _)| *at)
    }

    /// Resolves once new work may be claimable. Register interest with
    /// [`tokio::sync::futures::Notified::enable`] before checking the queue
    /// to avoid missing a wakeup.
    pub fn ready_signal(&self) -> &Notify {
        &self.ready
    }

    pub fn heartbeat(&self, lease: Lease) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        match state.active_lease(lease) {
            Some(job) => {
                job.heartbeat(now);
                let job = job.clone();
                self.persist(&job);
                true
            }
            None => false,
        }
    }

    pub fn set_progress(&self, lease: Lease, progress: u8) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let Some(job) = state.active_lease(lease) else {
            return false;
        };
        if !job.advance(progress, now) {
            return false;
        }
        job.heartbeat(now);
        let job = job.clone();
        self.persist(&job);
        log::debug!("[QUEUE] Job {} at {}%", job.id, job.progress);
        true
    }

    /// Records the method chosen for the job's current attempt.
    pub fn set_method(&self, lease: Lease, method: RenderMethod) {
        let mut state = self.state.lock();
        if let Some(job) = state.active_lease(lease) {
            job.method = Some(method);
            let job = job.clone();
            self.persist(&job);
        }
    }

    /// `Active -> Completed`. The result must already be in the cache.
    pub fn complete(&self, lease: Lease, result: JobResult) -> Option<Job> {
        let now = self.clock.now();
        let job = {
            let mut state = self.state.lock();
            let Some(job) = state.active_lease(lease) else {
                log::warn!(
                    "[QUEUE] Ignoring completion of job {} attempt {}: lease is stale",
                    lease.id,
                    lease.attempt
                );
                return None;
            };
            job.complete(result, now);
            let job = job.clone();
            state.release_key(&job);
            self.persist(&job);
            job
        };
        log::info!(
            "[QUEUE] Job {} completed after {} attempt(s)",
            job.id,
            job.attempts
        );
        self.settled.notify_waiters();
        Some(job)
    }

    /// Applies the retry policy to a failed attempt.
    pub fn fail_attempt(
        &self,
        lease: Lease,
        error: AttemptError,
        base_delay: Duration,
    ) -> Option<(RetryDecision, Job)> {
        let now = self.clock.now();
        let (decision, job) = {
            let mut state = self.state.lock();
            let Some(job) = state.active_lease(lease) else {
                log::warn!(
                    "[QUEUE] Ignoring failure of job {} attempt {}: lease is stale",
                    lease.id,
                    lease.attempt
                );
                return None;
            };
            let decision = job.record_failure(error, base_delay, now);
            let job = job.clone();
            match decision {
                RetryDecision::Retry { .. } => {
                    state.ready.insert((job.available_at, job.seq, job.id));
                }
                RetryDecision::Fail => state.release_key(&job),
            }
            self.persist(&job);
            (decision, job)
        };
        self.announce_failure(&job, decision);
        Some((decision, job))
    }

    fn announce_failure(&self, job: &Job, decision: RetryDecision) {
        match decision {
            RetryDecision::Retry { delay } => {
                log::info!(
                    "[QUEUE] Job {} attempt {}/{} failed ({}); retrying in {:?}",
                    job.id,
                    job.attempts,
                    job.max_attempts,
                    job.last_error.as_ref().map(|e| e.message.as_str()).unwrap_or_default(),
                    delay
                );
                self.ready.notify_one();
            }
            RetryDecision::Fail => {
                if let Some(failure) = &job.failure {
                    log::error!("[QUEUE] Job {} failed: {}", job.id, failure);
                }
                self.settled.notify_waiters();
            }
        }
    }

    /// Requeues (or fails) `Active` jobs whose heartbeat is older than
    /// `timeout`.
    pub fn reap_stalled(&self, timeout: Duration) -> usize {
        let now = self.clock.now();
        let reaped: Vec<(RetryDecision, Job)> = {
            let mut state = self.state.lock();
            let stalled: Vec<JobId> = state
                .jobs
                .values()
                .filter(|job| job.is_stalled(timeout, now))
                .map(|job| job.id)
                .collect();
            stalled
                .into_iter()
                .filter_map(|id| {
                    let job = state.jobs.get_mut(&id)?;
                    let decision = job.requeue_stalled(now);
                    let job = job.clone();
                    match decision {
                        RetryDecision::Retry { .. } => {
                            state.ready.insert((job.available_at, job.seq, job.id));
                        }
                        RetryDecision::Fail => state.release_key(&job),
                    }
                    self.persist(&job);
                    Some((decision, job))
                })
                .collect()
        };
        for (decision, job) in &reaped {
            log::warn!("[QUEUE] Job {} stalled on attempt {}", job.id, job.attempts);
            self.announce_failure(job, *decision);
        }
        reaped.len()
    }

    /// Cancels a job. Queued jobs are deleted; running jobs are left to
    /// finish.
    pub fn cancel(&self, id: &JobId) -> Option<CancelOutcome> {
        let outcome = {
            let mut state = self.state.lock();
            let job = state.jobs.get(id)?;
            match job.state {
                JobState::Queued => {
                    let key = (job.available_at, job.seq, job.id);
                    let job = state.jobs.remove(id)?;
                    state.ready.remove(&key);
                    state.release_key(&job);
                    self.unpersist(id);
                    CancelOutcome::Removed
                }
                JobState::Active => {
                    let job = state.jobs.get_mut(id)?;
                    job.cancel_requested = true;
                    let job = job.clone();
                    self.persist(&job);
                    CancelOutcome::Detached
                }
                terminal => CancelOutcome::AlreadyFinished { state: terminal },
            }
        };
        log::info!("[QUEUE] Cancel job {}: {:?}", id, outcome);
        if outcome == CancelOutcome::Removed {
            self.settled.notify_waiters();
        }
        Some(outcome)
    }

    /// Deletes terminal jobs older than their retention window.
    pub fn purge_finished(&self, completed_retention: Duration, failed_retention: Duration) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let expired: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| {
                let retention = match job.state {
                    JobState::Completed => completed_retention,
                    JobState::Failed => failed_retention,
                    _ => return false,
                };
                job.finished_at
                    .is_some_and(|at| quire_types::time::after(at, retention) <= now)
            })
            .map(|job| job.id)
            .collect();
        for id in &expired {
            state.jobs.remove(id);
            self.unpersist(id);
        }
        if !expired.is_empty() {
            log::info!("[QUEUE] Purged {} finished jobs", expired.len());
        }
        expired.len()
    }

    /// Resolves when the job is `Completed` or `Failed`. Returns `None` if
    /// the job does not exist or is removed while waiting.
    pub async fn wait(&self, id: &JobId) -> Option<Job> {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let job = self.get(id)?;
            if job.state.is_terminal() {
                return Some(job);
            }
            notified.await;
        }
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.state.lock().jobs.get(id).cloned()
    }

    /// The job currently producing `key`, if any.
    pub fn in_flight(&self, key: &CacheKey) -> Option<Job> {
        let state = self.state.lock();
        state.in_flight.get(key).and_then(|id| state.jobs.get(id)).cloned()
    }

    pub fn depth(&self) -> QueueDepth {
        let state = self.state.lock();
        state.jobs.values().fold(QueueDepth::default(), |mut depth, job| {
            match job.state {
                JobState::Queued => depth.queued += 1,
                JobState::Active => depth.active += 1,
                _ => {}
            }
            depth
        })
    }

    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&self) {
        if let Err(e) = self.table.flush() {
            log::warn!("[QUEUE] Failed to flush job table: {}", e);
        }
    }
}
