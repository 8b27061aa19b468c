//! Scripted backends for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::LlmError;
use crate::provider::{ChatResponse, Embedder, LlmProvider, Message, ToolDefinition, ToolUseRequest};

pub const MOCK_EMBEDDING_DIM: usize = 64;

/// One scripted reaction of [`MockProvider`].
#[derive(Clone, Debug)]
pub enum MockReply {
    Respond(ChatResponse),
    RateLimited,
    Malformed,
    Fail(String),
    /// Sleep for the given milliseconds, then answer with the default response.
    Hang(u64),
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    script: Arc<Mutex<VecDeque<MockReply>>>,
    seen: Arc<Mutex<Vec<Vec<Message>>>>,
    calls: Arc<AtomicUsize>,
    pub default_response: ChatResponse,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            seen: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            default_response: ChatResponse::Text("mock response".into()),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_script(script: impl IntoIterator<Item = MockReply>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            ..Self::default()
        }
    }

    /// Script plain text answers, in order.
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self::with_script(
            responses
                .into_iter()
                .map(|r| MockReply::Respond(ChatResponse::Text(r))),
        )
    }

    /// A provider that answers with `reply` on every call (up to 1024 of them).
    #[must_use]
    pub fn always(reply: &MockReply) -> Self {
        Self::with_script(std::iter::repeat_n(reply.clone(), 1024))
    }

    #[must_use]
    pub fn with_default(mut self, response: ChatResponse) -> Self {
        self.default_response = response;
        self
    }

    pub fn push(&self, reply: MockReply) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Transcripts received so far, one per call.
    #[must_use]
    pub fn transcripts(&self) -> Vec<Vec<Message>> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Convenience constructor for a single scripted tool call.
#[must_use]
pub fn tool_call(id: &str, name: &str, input: serde_json::Value) -> ChatResponse {
    ChatResponse::ToolUse {
        text: None,
        tool_calls: vec![ToolUseRequest {
            id: id.into(),
            name: name.into(),
            input,
        }],
    }
}

impl LlmProvider for MockProvider {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            None => Ok(self.default_response.clone()),
            Some(MockReply::Respond(resp)) => Ok(resp),
            Some(MockReply::RateLimited) => Err(LlmError::RateLimited),
            Some(MockReply::Malformed) => {
                Err(LlmError::MalformedResponse("mock malformed output".into()))
            }
            Some(MockReply::Fail(msg)) => Err(LlmError::Other(msg)),
            Some(MockReply::Hang(ms)) => {
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                Ok(self.default_response.clone())
            }
        }
    }
}

/// Deterministic embedder: hashed bag of lowercase words, L2-normalised.
///
/// Texts sharing words land close together, which is enough for ranking tests.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedder {
    /// Any text containing this substring makes the whole batch fail.
    pub fail_on: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockEmbedder {
    #[must_use]
    pub fn failing_on(marker: impl Into<String>) -> Self {
        Self {
            fail_on: Some(marker.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; MOCK_EMBEDDING_DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
        {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let slot = usize::from(bytes[0]) % MOCK_EMBEDDING_DIM;
            v[slot] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Embedder for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_on
            && texts.iter().any(|t| t.contains(marker.as_str()))
        {
            return Err(LlmError::InvalidInput(format!(
                "mock embedder refused input containing {marker:?}"
            )));
        }
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
}
