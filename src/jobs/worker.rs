// src/jobs/worker.rs
//! The worker pool.
//!
//! ```text
//! Dispatcher --(job, idle permit)--> Channel --> Workers (N)
//!     |                                              |
//! claims the oldest ready job              runs one attempt, then
//! once a worker is idle and the            returns its permit
//! rate limiter allows a start
//! ```
//!
//! A maintenance task alongside reaps stalled jobs and purges expired cache
//! entries and old terminal jobs.

use crate::cache::CacheStore;
use crate::jobs::queue::JobQueue;
use crate::jobs::rate_limit::StartLimiter;
use crate::jobs::runner::JobRunner;
use quire_types::{Job, time};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound on how long the dispatcher sleeps without re-checking the
/// queue.
const IDLE_RECHECK: Duration = Duration::from_secs(5);

pub(crate) type Dispatch = (Job, OwnedSemaphorePermit);
pub(crate) type DispatchSender = async_channel::Sender<Dispatch>;
pub(crate) type DispatchReceiver = async_channel::Receiver<Dispatch>;

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub worker_count: usize,
    pub rate_limit_starts: u32,
    pub rate_limit_window: Duration,
    pub stall_timeout: Duration,
    pub purge_interval: Duration,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
}

/// Closes the dispatch channel when dropped so workers drain and exit.
pub(crate) struct SenderGuard<T> {
    sender: async_channel::Sender<T>,
}

impl<T> SenderGuard<T> {
    pub fn new(sender: async_channel::Sender<T>) -> Self {
        Self { sender }
    }

    pub fn sender(&self) -> &async_channel::Sender<T> {
        &self.sender
    }
}

impl<T> Drop for SenderGuard<T> {
    fn drop(&mut self) {
        self.sender.close();
    }
}

/// Running background tasks of the service.
#[derive(Debug)]
pub struct WorkerPool {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(runner: Arc<JobRunner>, cache: Arc<CacheStore>, settings: PoolSettings) -> Self {
        let token = CancellationToken::new();
        let worker_count = settings.worker_count.max(1);
        let (tx, rx) = async_channel::bounded::<Dispatch>(worker_count);
        let idle = Arc::new(Semaphore::new(worker_count));
        let limiter = StartLimiter::new(
            settings.rate_limit_starts,
            settings.rate_limit_window,
            runner.queue().clock().clone(),
        );

        let mut tasks = Vec::with_capacity(worker_count + 2);
        tasks.push(tokio::spawn(dispatch(
            runner.queue().clone(),
            idle,
            limiter,
            SenderGuard::new(tx),
            token.clone(),
        )));
        for worker_id in 0..worker_count {
            tasks.push(tokio::spawn(work(worker_id, runner.clone(), rx.clone())));
        }
        tasks.push(tokio::spawn(maintain(
            runner.queue().clone(),
            cache,
            settings,
            token.clone(),
        )));

        log::info!(
            "[QUEUE] Started {} workers ({} starts per {:?})",
            worker_count,
            settings.rate_limit_starts,
            settings.rate_limit_window
        );
        Self { token, tasks }
    }

    /// Stops claiming new work and waits for in-progress attempts to
    /// finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("[QUEUE] Background task ended abnormally: {}", e);
            }
        }
        log::info!("[QUEUE] Worker pool stopped");
    }
}

async fn dispatch(
    queue: Arc<JobQueue>,
    idle: Arc<Semaphore>,
    limiter: StartLimiter,
    guard: SenderGuard<Dispatch>,
    token: CancellationToken,
) {
    loop {
        let permit = tokio::select! {
            _ = token.cancelled() => break,
            permit = idle.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let Some(job) = next_job(&queue, &limiter, &token).await else {
            break;
        };
        log::debug!("[QUEUE] Dispatching job {} attempt {}", job.id, job.attempts);
        if guard.sender().send((job, permit)).await.is_err() {
            log::warn!("[QUEUE] Worker channel closed.");
            break;
        }
    }
    log::debug!("[QUEUE] Dispatcher stopped");
}

/// Waits for a claimable job and a free start slot. `None` on shutdown.
async fn next_job(queue: &JobQueue, limiter: &StartLimiter, token: &CancellationToken) -> Option<Job> {
    loop {
        let notified = queue.ready_signal().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let now = queue.clock().now();
        let wait = match queue.next_ready_at() {
            Some(at) if at <= now => match limiter.check() {
                Ok(()) => match queue.claim_next() {
                    Some(job) => {
                        limiter.record();
                        return Some(job);
                    }
                    None => continue,
                },
                Err(wait) => {
                    log::debug!("[QUEUE] Start rate limited for {:?}", wait);
                    wait
                }
            },
            Some(at) => time::elapsed(now, at).min(IDLE_RECHECK),
            None => IDLE_RECHECK,
        };

        tokio::select! {
            _ = token.cancelled() => return None,
            _ = &mut notified => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

async fn work(worker_id: usize, runner: Arc<JobRunner>, rx: DispatchReceiver) {
    log::debug!("[WORKER-{}] Started.", worker_id);
    while let Ok((job, permit)) = rx.recv().await {
        log::info!(
            "[WORKER-{}] Job {} attempt {}/{} for proposal '{}'",
            worker_id,
            job.id,
            job.attempts,
            job.max_attempts,
            job.request.proposal_id
        );
        if let Some(after) = runner.process(&job).await {
            log::debug!("[WORKER-{}] Job {} is now {}", worker_id, after.id, after.state);
        }
        drop(permit);
    }
    log::debug!("[WORKER-{}] Shutting down.", worker_id);
}

async fn maintain(
    queue: Arc<JobQueue>,
    cache: Arc<CacheStore>,
    settings: PoolSettings,
    token: CancellationToken,
) {
    let reap_every = (settings.stall_timeout / 2).max(Duration::from_millis(10));
    let mut reaper = tokio::time::interval(reap_every);
    let mut purger = tokio::time::interval(settings.purge_interval.max(Duration::from_millis(10)));
    reaper.reset();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = reaper.tick() => {
                let reaped = queue.reap_stalled(settings.stall_timeout);
                if reaped > 0 {
                    log::warn!("[QUEUE] Requeued {} stalled jobs", reaped);
                }
            }
            _ = purger.tick() => {
                cache.purge_expired();
                queue.purge_finished(settings.completed_retention, settings.failed_retention);
                cache.flush();
                queue.flush();
            }
        }
    }
}
