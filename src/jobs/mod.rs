// src/jobs/mod.rs
//! Durable job execution: the queue, the start rate limiter, the runner
//! that executes one attempt, and the worker pool that drives it.

mod queue;
mod rate_limit;
mod runner;
mod worker;

pub use queue::{Admission, CancelOutcome, JobQueue, Lease, QueueDepth};
pub use rate_limit::StartLimiter;
pub use runner::{JobRunner, RendererSet, RunnerSettings};
pub use worker::{PoolSettings, WorkerPool};
