use prism_llm::{LlmError, RetryExhausted};
use serde::{Deserialize, Serialize};

/// Stable classification of a failure, part of the review output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedInput,
    NotFound,
    BackendTimeout,
    BackendRateLimited,
    MalformedResponse,
    Backend,
    Cancelled,
}

impl ErrorKind {
    #[must_use]
    pub fn of_llm(err: &LlmError) -> Self {
        match err {
            LlmError::Timeout { .. } => Self::BackendTimeout,
            LlmError::RateLimited => Self::BackendRateLimited,
            LlmError::MalformedResponse(_) | LlmError::EmptyResponse { .. } | LlmError::Json(_) => {
                Self::MalformedResponse
            }
            _ => Self::Backend,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MalformedInput => "malformed_input",
            Self::NotFound => "not_found",
            Self::BackendTimeout => "backend_timeout",
            Self::BackendRateLimited => "backend_rate_limited",
            Self::MalformedResponse => "malformed_response",
            Self::Backend => "backend",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("malformed PR payload: {0}")]
    MalformedInput(String),

    #[error("language model call failed after {retries} retries: {source}")]
    Llm {
        #[source]
        source: LlmError,
        retries: u32,
    },

    #[error("review cancelled")]
    Cancelled,
}

impl ReviewError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedInput(_) => ErrorKind::MalformedInput,
            Self::Llm { source, .. } => ErrorKind::of_llm(source),
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Retries spent before giving up; zero for non-retryable failures.
    #[must_use]
    pub fn retries(&self) -> u32 {
        match self {
            Self::Llm { retries, .. } => *retries,
            _ => 0,
        }
    }
}

impl From<RetryExhausted> for ReviewError {
    fn from(e: RetryExhausted) -> Self {
        Self::Llm {
            source: e.error,
            retries: e.retries,
        }
    }
}
