// src/error.rs
use crate::config::ConfigError;
use quire_render_core::RenderError;
use quire_traits::{ContentError, StoreError};
use quire_types::{FailureKind, JobFailure, RenderMethod};
use thiserror::Error;

/// Every way a generation request can fail, as seen by a caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// Unknown proposal or job id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The external tool behind `method` is missing or misconfigured.
    #[error("{method} renderer unavailable: {reason} (try method '{suggested}')")]
    RendererUnavailable {
        method: RenderMethod,
        reason: String,
        suggested: RenderMethod,
    },

    #[error("Renderer timed out: {0}")]
    RendererTimeout(String),

    #[error("Renderer failed: {0}")]
    RendererFailure(String),

    /// Cache filesystem trouble. The cache store logs these; generation
    /// never fails because of one.
    #[error("Cache I/O error: {0}")]
    CacheIo(String),

    #[error("Generation failed after {attempts} attempts: {last_error}")]
    QueueExhausted { attempts: u32, last_error: String },

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Service overloaded: {0}")]
    Overloaded(String),
}

impl GenerationError {
    /// Maps a terminal job failure onto the caller-facing taxonomy.
    ///
    /// Inline jobs only ever get one attempt, so their retryable failures are
    /// reported by kind rather than as an exhausted queue.
    pub fn from_failure(failure: &JobFailure, inline: bool) -> Self {
        let error = &failure.error;
        match error.kind {
            FailureKind::NotFound => GenerationError::NotFound(error.message.clone()),
            FailureKind::RendererUnavailable => {
                let method = error.method.unwrap_or(RenderMethod::Browser);
                GenerationError::RendererUnavailable {
                    method,
                    reason: error.message.clone(),
                    suggested: error.suggested_method.unwrap_or(method.alternative()),
                }
            }
            _ if failure.exhausted && !inline => GenerationError::QueueExhausted {
                attempts: failure.attempts,
                last_error: error.message.clone(),
            },
            FailureKind::RendererTimeout => GenerationError::RendererTimeout(error.message.clone()),
            FailureKind::Content | FailureKind::RendererFailure => {
                GenerationError::RendererFailure(error.message.clone())
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GenerationError::NotFound(_))
    }
}

impl From<ConfigError> for GenerationError {
    fn from(e: ConfigError) -> Self {
        GenerationError::Config(e.to_string())
    }
}

impl From<ContentError> for GenerationError {
    fn from(e: ContentError) -> Self {
        match e {
            ContentError::NotFound(id) => GenerationError::NotFound(format!("proposal '{}'", id)),
            other => GenerationError::RendererFailure(other.to_string()),
        }
    }
}

impl From<RenderError> for GenerationError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::Unavailable { method, reason } => GenerationError::RendererUnavailable {
                method,
                reason,
                suggested: method.alternative(),
            },
            RenderError::Timeout { .. } => GenerationError::RendererTimeout(e.to_string()),
            other => GenerationError::RendererFailure(other.to_string()),
        }
    }
}
