//! Generation jobs and their state machine.
//!
//! ```text
//! Queued ──pickup──▶ Active ──success──▶ Completed
//!   ▲                  │
//!   └──retry (delay)───┤
//!                      └──exhausted / permanent──▶ Failed
//! ```
//!
//! All transitions go through methods on [`Job`] so the retry policy can be
//! exercised without a queue or a renderer.

use crate::ids::{CacheKey, JobId};
use crate::options::{GenerationRequest, RenderMethod};
use crate::time::after;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Caller-facing status name. `Active` is reported as `processing`.
    pub fn as_status(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_status())
    }
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The proposal does not exist.
    NotFound,
    /// The content source could not be read.
    Content,
    /// The external tool is missing or misconfigured.
    RendererUnavailable,
    RendererTimeout,
    RendererFailure,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Content | FailureKind::RendererTimeout | FailureKind::RendererFailure
        )
    }
}

/// What went wrong in one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptError {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<RenderMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_method: Option<RenderMethod>,
}

impl AttemptError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            method: None,
            suggested_method: None,
        }
    }

    pub fn with_method(mut self, method: RenderMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_suggestion(mut self, method: RenderMethod) -> Self {
        self.suggested_method = Some(method);
        self
    }
}

/// Terminal failure of a job: the last attempt's error, verbatim, plus the
/// number of attempts made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    #[serde(flatten)]
    pub error: AttemptError,
    pub attempts: u32,
    /// True when the job failed because retries ran out rather than on a
    /// permanent error.
    pub exhausted: bool,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (after {} attempt{})",
            self.error.message,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub file_path: PathBuf,
    pub file_size: u64,
    pub method: RenderMethod,
}

/// Outcome of [`Job::record_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back in `Queued`, not claimable before `delay` has passed.
    Retry { delay: Duration },
    /// Permanently `Failed`.
    Fail,
}

/// `base * 2^(attempt - 1)`: the first retry waits `base`, the second
/// `2 * base`, and so on. Saturates instead of overflowing.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    1u32.checked_shl(exponent)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// A unit of generation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub request: GenerationRequest,
    pub cache_key: CacheKey,
    /// The method actually used, known once the job has been planned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<RenderMethod>,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    /// Error of the most recent failed attempt, kept while retrying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<AttemptError>,
    /// Executed by a synchronous caller rather than the worker pool.
    #[serde(default)]
    pub inline: bool,
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Earliest instant a `Queued` job may be claimed.
    pub available_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<DateTime<Utc>>,
    /// Enqueue sequence number, the FIFO tiebreaker.
    pub seq: u64,
}

impl Job {
    pub fn new(
        request: GenerationRequest,
        cache_key: CacheKey,
        max_attempts: u32,
        seq: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            request,
            cache_key,
            method: None,
            state: JobState::Queued,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            progress: 0,
            result: None,
            failure: None,
            last_error: None,
            inline: false,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            available_at: now,
            heartbeat_at: None,
            seq,
        }
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Queued && self.available_at <= now
    }

    /// Worker pickup: `Queued -> Active`, counting the attempt.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        debug_assert_eq!(self.state, JobState::Queued);
        self.state = JobState::Active;
        self.attempts = self.attempts.saturating_add(1).min(self.max_attempts);
        self.started_at.get_or_insert(now);
        self.heartbeat_at = Some(now);
        self.updated_at = now;
    }

    /// Raises progress; lower values are ignored.
    pub fn advance(&mut self, progress: u8, now: DateTime<Utc>) -> bool {
        let progress = progress.min(100);
        if self.state != JobState::Active || progress <= self.progress {
            return false;
        }
        self.progress = progress;
        self.updated_at = now;
        true
    }

    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        if self.state == JobState::Active {
            self.heartbeat_at = Some(now);
        }
    }

    /// `Active -> Completed`. The caller must have persisted the cache entry
    /// for `result` before calling this.
    pub fn complete(&mut self, result: JobResult, now: DateTime<Utc>) {
        self.state = JobState::Completed;
        self.method = Some(result.method);
        self.result = Some(result);
        self.progress = 100;
        self.last_error = None;
        self.finished_at = Some(now);
        self.heartbeat_at = None;
        self.updated_at = now;
    }

    /// Applies the retry policy to a failed attempt.
    pub fn record_failure(
        &mut self,
        error: AttemptError,
        base_delay: Duration,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        self.heartbeat_at = None;
        self.updated_at = now;

        if error.kind.is_retryable() && self.attempts < self.max_attempts {
            let delay = backoff_delay(base_delay, self.attempts);
            self.state = JobState::Queued;
            self.available_at = after(now, delay);
            self.last_error = Some(error);
            return RetryDecision::Retry { delay };
        }

        let exhausted = error.kind.is_retryable();
        self.fail(
            JobFailure {
                error,
                attempts: self.attempts,
                exhausted,
            },
            now,
        );
        RetryDecision::Fail
    }

    /// Handles a job whose worker stopped sending heartbeats. The lost
    /// attempt still counts.
    pub fn requeue_stalled(&mut self, now: DateTime<Utc>) -> RetryDecision {
        let error = AttemptError::new(
            FailureKind::RendererFailure,
            "job stalled: worker stopped reporting progress",
        );
        self.record_failure(error, Duration::ZERO, now)
    }

    pub fn fail(&mut self, failure: JobFailure, now: DateTime<Utc>) {
        self.state = JobState::Failed;
        self.last_error = Some(failure.error.clone());
        self.failure = Some(failure);
        self.finished_at = Some(now);
        self.heartbeat_at = None;
        self.updated_at = now;
    }

    /// Whether the job has been `Active` without a heartbeat for longer
    /// than `timeout`.
    pub fn is_stalled(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        match (self.state, self.heartbeat_at) {
            (JobState::Active, Some(beat)) => after(beat, timeout) < now,
            (JobState::Active, None) => true,
            _ => false,
        }
    }
}
