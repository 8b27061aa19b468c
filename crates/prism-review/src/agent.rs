use prism_llm::{ChatResponse, LlmError, ToolUseRequest};

use crate::verdict::ReviewVerdict;

/// The agent's next move, decoded from one model response.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStep {
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolUseRequest>,
    },
    Final(ReviewVerdict),
}

impl AgentStep {
    /// # Errors
    ///
    /// Returns `LlmError::MalformedResponse` when the response is neither a
    /// tool request nor a parseable verdict.
    pub fn from_response(response: ChatResponse) -> Result<Self, LlmError> {
        match response {
            ChatResponse::ToolUse { text, tool_calls } if !tool_calls.is_empty() => {
                Ok(Self::ToolCalls {
                    text,
                    calls: tool_calls,
                })
            }
            ChatResponse::ToolUse { text: Some(text), .. } | ChatResponse::Text(text) => {
                ReviewVerdict::parse(&text).map(Self::Final).map_err(|e| {
                    LlmError::MalformedResponse(format!("final answer is not a review verdict: {e}"))
                })
            }
            ChatResponse::ToolUse { text: None, .. } => Err(LlmError::MalformedResponse(
                "tool use response without tool calls".into(),
            )),
        }
    }
}
