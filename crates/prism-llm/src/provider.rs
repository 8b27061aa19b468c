use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of a conversation transcript.
///
/// Assistant turns that requested tools carry `tool_calls`; the matching tool
/// results are `Role::Tool` messages with `tool_call_id` set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolUseRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    #[must_use]
    pub fn assistant_tool_calls(text: Option<String>, calls: Vec<ToolUseRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.unwrap_or_default(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Tool description in the shape native tool-calling APIs expect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A single tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolUseRequest {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChatResponse {
    /// Plain assistant text, no tools requested.
    Text(String),
    /// The model wants one or more tools run before it continues.
    ToolUse {
        text: Option<String>,
        tool_calls: Vec<ToolUseRequest>,
    },
}

pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Send the transcript plus the tool catalogue and return the model's next move.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::RateLimited`, `LlmError::Timeout`, or
    /// `LlmError::MalformedResponse` for backend failures the caller may retry.
    fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> impl Future<Output = Result<ChatResponse, LlmError>> + Send;
}

/// Text embedding backend with a fixed output dimension.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::RateLimited` or `LlmError::InvalidInput` when the
    /// backend refuses the batch.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send;

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Same as [`Embedder::embed_batch`]; an empty batch result is
    /// `LlmError::EmptyResponse`.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send {
        let texts = vec![text.to_owned()];
        async move {
            let mut vectors = self.embed_batch(&texts).await?;
            vectors.pop().ok_or(LlmError::EmptyResponse {
                provider: "embedder".into(),
            })
        }
    }
}
