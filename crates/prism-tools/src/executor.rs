use std::fmt;

use prism_llm::ToolUseRequest;
use serde::Serialize;

/// Structured tool invocation from the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Correlates the result with the model's tool-use request.
    pub id: String,
    pub tool_id: String,
    pub params: serde_json::Value,
}

impl ToolCall {
    #[must_use]
    pub fn new(id: impl Into<String>, tool_id: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            tool_id: tool_id.into(),
            params,
        }
    }
}

impl From<&ToolUseRequest> for ToolCall {
    fn from(req: &ToolUseRequest) -> Self {
        Self::new(req.id.clone(), req.name.clone(), req.input.clone())
    }
}

/// Outcome of a dispatched [`ToolCall`]. Errors are data, not `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    #[must_use]
    pub fn ok(call: &ToolCall, content: String) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.tool_id.clone(),
            content,
            is_error: false,
        }
    }

    #[must_use]
    pub fn error(call: &ToolCall, err: &ToolError) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.tool_id.clone(),
            content: format!("error: {err}"),
            is_error: true,
        }
    }
}

impl fmt::Display for ToolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content)
    }
}

pub const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

fn floor_boundary(s: &str, mut idx: usize) -> usize {
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(s: &str, mut idx: usize) -> usize {
    while !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Truncate tool output that exceeds `MAX_TOOL_OUTPUT_CHARS` using head+tail split.
#[must_use]
pub fn truncate_tool_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let half = MAX_TOOL_OUTPUT_CHARS / 2;
    let head_end = floor_boundary(output, half);
    let tail_start = ceil_boundary(output, output.len() - half);
    let head = &output[..head_end];
    let tail = &output[tail_start..];
    let truncated = tail_start - head_end;

    format!(
        "{head}\n\n... [truncated {truncated} chars, showing first and last ~{half} chars] ...\n\n{tail}"
    )
}

/// Errors that can occur during tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {tool_id}")]
    UnknownTool { tool_id: String },

    #[error("invalid tool parameters: {message}")]
    InvalidParams { message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("tool timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("backend failure: {0}")]
    Backend(String),
}

impl From<prism_index::IndexError> for ToolError {
    fn from(err: prism_index::IndexError) -> Self {
        if err.is_not_found() {
            Self::NotFound(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

/// Deserialize tool call params into a typed struct. A missing (`null`)
/// argument object is treated as empty.
///
/// # Errors
///
/// Returns `ToolError::InvalidParams` when deserialization fails.
pub fn deserialize_params<T: serde::de::DeserializeOwned>(
    params: &serde_json::Value,
) -> Result<T, ToolError> {
    let value = match params {
        serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
        serde_json::Value::Object(_) => params.clone(),
        other => {
            return Err(ToolError::InvalidParams {
                message: format!("expected an object of arguments, got {other}"),
            });
        }
    };
    serde_json::from_value(value).map_err(|e| ToolError::InvalidParams {
        message: e.to_string(),
    })
}
