//! Language-model and embedding backend abstraction.
//!
//! Review and indexing code is generic over [`LlmProvider`] and [`Embedder`];
//! [`openai::OpenAiProvider`] talks to any OpenAI-compatible endpoint, and the
//! `mock` feature provides scripted backends for tests.

pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;
pub mod provider;
pub mod retry;

pub use error::LlmError;
pub use provider::{
    ChatResponse, Embedder, LlmProvider, Message, Role, ToolDefinition, ToolUseRequest,
};
pub use retry::{RetryExhausted, RetryPolicy, call_with_retry};
