use quire_types::RenderMethod;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// The external tool is missing or cannot be started.
    #[error("{method} renderer unavailable: {reason}")]
    Unavailable { method: RenderMethod, reason: String },
    #[error("{method} renderer timed out after {}s", after.as_secs_f32())]
    Timeout { method: RenderMethod, after: Duration },
    /// The tool ran but left no (or an empty) output file behind.
    #[error("{method} renderer produced no output: {detail}")]
    NoOutput { method: RenderMethod, detail: String },
    #[error("{method} renderer failed: {message}")]
    Failed { method: RenderMethod, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    pub fn unavailable(method: RenderMethod, reason: impl Into<String>) -> Self {
        RenderError::Unavailable {
            method,
            reason: reason.into(),
        }
    }

    pub fn failed(method: RenderMethod, message: impl Into<String>) -> Self {
        RenderError::Failed {
            method,
            message: message.into(),
        }
    }

    /// Everything except a missing tool is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RenderError::Unavailable { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RenderError::Timeout { .. })
    }

    pub fn method(&self) -> Option<RenderMethod> {
        match self {
            RenderError::Unavailable { method, .. }
            | RenderError::Timeout { method, .. }
            | RenderError::NoOutput { method, .. }
            | RenderError::Failed { method, .. } => Some(*method),
            RenderError::Io(_) => None,
        }
    }
}
