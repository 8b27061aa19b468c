//! Error types for prism-index.

use crate::vector_store::VectorStoreError;

/// Errors that can occur while indexing or reading collections.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files or snapshots.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedding backend error, after retries.
    #[error("embedding failed after {retries} retries: {source}")]
    Embedding {
        #[source]
        source: prism_llm::LlmError,
        retries: u32,
    },

    /// Vector store error.
    #[error("vector store error: {0}")]
    Store(#[from] VectorStoreError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing collection or record.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Embedding vectors of a collection must all have the same length.
    #[error("dimension mismatch: collection uses {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Invalid configuration or argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl IndexError {
    pub(crate) fn collection_not_found(name: &str) -> Self {
        Self::NotFound {
            kind: "collection",
            name: name.to_owned(),
        }
    }

    pub(crate) fn record_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "record",
            name: id.to_owned(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<prism_llm::RetryExhausted> for IndexError {
    fn from(e: prism_llm::RetryExhausted) -> Self {
        Self::Embedding {
            source: e.error,
            retries: e.retries,
        }
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
