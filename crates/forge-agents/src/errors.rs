//! Error taxonomy for generation and orchestration, with retry classification.
//!
//! Callers query `is_retriable()` / `retry_category()` instead of matching
//! on message strings.
//!
//! ## Retry categories
//!
//! | Category    | Retriable | Raised by                                   |
//! |-------------|-----------|---------------------------------------------|
//! | Transient   | yes       | backend / stream / empty response           |
//! | Parse       | yes       | structured output that failed to parse      |
//! | Cancelled   | no        | cancellation token fired                    |
//! | Terminal    | no        | busy, disposed, failed reinit, bad config, retry exhausted |

use std::fmt;

use thiserror::Error;

/// Classification used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Network, backend, or session failure; retry with back-off.
    Transient,
    /// Model output did not match the expected shape.
    Parse,
    /// Caller cancelled; propagate immediately.
    Cancelled,
    /// Retrying cannot help.
    Terminal,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient | Self::Parse)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Parse => write!(f, "parse"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Errors raised by the generation engine and its backends.
#[derive(Debug, Error)]
pub enum GenerationError {
    // ── Retriable ─────────────────────────────────────────────────────────
    /// The backend request failed (connect, HTTP status, timeout).
    #[error("Backend failure: {0}")]
    Backend(String),

    /// The token stream broke mid-response.
    #[error("Stream failure: {0}")]
    Stream(String),

    /// The model produced no usable text.
    #[error("Model returned an empty response")]
    EmptyResponse,

    /// Structured output could not be parsed.
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    // ── Non-retriable ─────────────────────────────────────────────────────
    /// Fail-fast admission found the engine occupied.
    #[error("Engine is busy")]
    Busy,

    /// The engine was shut down.
    #[error("Engine has been disposed")]
    Disposed,

    /// The session could not be (re)initialized.
    #[error("Invalid engine state: {0}")]
    InvalidState(String),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Every attempt failed; carries the last underlying error.
    #[error("Generation failed after {attempts} attempt(s): {source}")]
    GenerationFailed {
        attempts: u32,
        #[source]
        source: Box<GenerationError>,
    },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GenerationError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Backend(_) | Self::Stream(_) | Self::EmptyResponse | Self::Internal(_) => {
                RetryCategory::Transient
            }
            Self::ParseFailure(_) => RetryCategory::Parse,
            Self::Cancelled => RetryCategory::Cancelled,
            // A failed reinitialization surfaces as-is; the next request
            // tries again from Error.
            Self::InvalidState(_) => RetryCategory::Terminal,
            Self::Busy | Self::Disposed | Self::Configuration(_) => RetryCategory::Terminal,
            Self::GenerationFailed { .. } => RetryCategory::Terminal,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::GenerationFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// The innermost error behind retry wrapping.
    pub fn root(&self) -> &GenerationError {
        match self {
            Self::GenerationFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn exhausted(attempts: u32, last: GenerationError) -> Self {
        Self::GenerationFailed {
            attempts,
            source: Box::new(last),
        }
    }
}

/// Errors surfaced by the refinement orchestrator.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// An external service call errored (not a negative verdict).
    #[error("{service} failed: {message}")]
    Collaborator { service: String, message: String },
}

impl ForgeError {
    pub fn collaborator(service: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Collaborator {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Generation(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

pub type GenerationResult<T> = Result<T, GenerationError>;
pub type ForgeResult<T> = Result<T, ForgeError>;
