use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{
    ChatResponse, Embedder, LlmProvider, Message, Role, ToolDefinition, ToolUseRequest,
};

const PROVIDER_NAME: &str = "openai";

/// Client for OpenAI-compatible `/chat/completions` and `/embeddings` endpoints.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    embedding_model: Option<String>,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

impl OpenAiProvider {
    /// # Errors
    ///
    /// Returns `LlmError::Http` if the HTTP client cannot be built.
    pub fn new(
        api_key: String,
        mut base_url: String,
        model: String,
        max_tokens: u32,
        embedding_model: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            client: crate::http::default_client(request_timeout)?,
            api_key,
            base_url,
            model,
            max_tokens,
            embedding_model,
        })
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<String, LlmError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| map_transport_error(LlmError::Http(e)))?;

        // One request per attempt; the caller's retry policy owns the budget.
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(endpoint, "rate limited");
            return Err(LlmError::RateLimited);
        }
        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(LlmError::Http(e)))?;

        if !status.is_success() {
            tracing::error!(%status, endpoint, body = %text, "OpenAI API error");
            if status.is_server_error() {
                return Err(LlmError::MalformedResponse(format!(
                    "{endpoint} returned status {status}"
                )));
            }
            return Err(LlmError::InvalidInput(format!(
                "{endpoint} rejected request (status {status})"
            )));
        }
        Ok(text)
    }
}

fn map_transport_error(err: LlmError) -> LlmError {
    match err {
        LlmError::Http(e) if e.is_timeout() => LlmError::Timeout { timeout_ms: 0 },
        other => other,
    }
}

impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        let api_messages = convert_messages(messages);
        let api_tools: Vec<OpenAiTool> = tools
            .iter()
            .map(|t| OpenAiTool {
                r#type: "function",
                function: OpenAiFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect();

        let body = ToolChatRequest {
            model: &self.model,
            messages: &api_messages,
            max_tokens: self.max_tokens,
            tools: &api_tools,
        };

        let text = self.post_json("chat/completions", &body).await?;
        parse_tool_chat_response(&text)
    }
}

impl Embedder for OpenAiProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let model = self
            .embedding_model
            .as_deref()
            .ok_or(LlmError::EmbedUnsupported {
                provider: PROVIDER_NAME.into(),
            })?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            input: texts,
            model,
        };
        let text = self.post_json("embeddings", &body).await?;
        parse_embedding_response(&text, texts.len())
    }
}

fn parse_tool_chat_response(text: &str) -> Result<ChatResponse, LlmError> {
    let resp: ToolChatResponse = serde_json::from_str(text)
        .map_err(|e| LlmError::MalformedResponse(format!("chat completion: {e}")))?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyResponse {
            provider: PROVIDER_NAME.into(),
        })?;

    let content = choice.message.content.unwrap_or_default();

    if let Some(tool_calls) = choice.message.tool_calls
        && !tool_calls.is_empty()
    {
        let text = if content.is_empty() {
            None
        } else {
            Some(content)
        };
        let calls = tool_calls
            .into_iter()
            .map(|tc| {
                let input = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
                ToolUseRequest {
                    id: tc.id,
                    name: tc.function.name,
                    input,
                }
            })
            .collect();
        return Ok(ChatResponse::ToolUse {
            text,
            tool_calls: calls,
        });
    }

    Ok(ChatResponse::Text(content))
}

fn parse_embedding_response(text: &str, expected: usize) -> Result<Vec<Vec<f32>>, LlmError> {
    let mut resp: EmbeddingResponse = serde_json::from_str(text)
        .map_err(|e| LlmError::MalformedResponse(format!("embeddings: {e}")))?;
    if resp.data.len() != expected {
        return Err(LlmError::MalformedResponse(format!(
            "expected {expected} embeddings, got {}",
            resp.data.len()
        )));
    }
    resp.data.sort_by_key(|d| d.index);
    Ok(resp.data.into_iter().map(|d| d.embedding).collect())
}

fn convert_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
                msg.tool_calls
                    .iter()
                    .map(|call| OpenAiToolCallOut {
                        id: call.id.clone(),
                        r#type: "function".to_owned(),
                        function: OpenAiFunctionCall {
                            name: call.name.clone(),
                            arguments: serde_json::to_string(&call.input).unwrap_or_default(),
                        },
                    })
                    .collect()
            });
            ApiMessage {
                role: role.to_owned(),
                content: msg.content.clone(),
                tool_calls,
                tool_call_id: msg.tool_call_id.clone(),
            }
        })
        .collect()
}

#[derive(Serialize)]
struct OpenAiTool<'a> {
    r#type: &'a str,
    function: OpenAiFunction<'a>,
}

#[derive(Serialize)]
struct OpenAiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Serialize)]
struct ToolChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    max_tokens: u32,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [OpenAiTool<'a>],
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCallOut>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct OpenAiToolCallOut {
    id: String,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ToolChatResponse {
    choices: Vec<ToolChatChoice>,
}

#[derive(Deserialize)]
struct ToolChatChoice {
    message: ToolChatMessage,
}

#[derive(Deserialize)]
struct ToolChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiToolCallFunction,
}

#[derive(Deserialize)]
struct OpenAiToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
