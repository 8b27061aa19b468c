//! Retrieval tools exposed to the review agent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use prism_index::Retriever;
use prism_llm::Embedder;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::executor::{ToolCall, ToolError, ToolResult, deserialize_params, truncate_tool_output};
use crate::registry::{ToolDef, ToolRegistry};

pub const DEFAULT_SEARCH_LIMIT: u32 = 10;
pub const MAX_SEARCH_LIMIT: u32 = 50;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListDirectoriesParams {
    /// Repository collection to list; defaults to the repository under review
    pub collection_name: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RecordLookupParams {
    /// Identifier of the indexed chunk (from search results)
    pub record_id: String,
    /// Collection holding the record; all collections are scanned when omitted
    pub collection_name: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchParams {
    /// Natural-language or code query
    pub query: String,
    /// Collection to search; defaults to the repository under review
    pub collection_name: Option<String>,
    /// Maximum number of results (1-50, default 10)
    #[schemars(range(min = 1, max = 50))]
    pub limit: Option<u32>,
}

/// The four retrieval tools in catalogue order.
#[must_use]
pub fn retrieval_tools() -> Vec<ToolDef> {
    vec![
        ToolDef {
            id: "list_directories",
            description: "List the file paths indexed for a repository collection. \
                          Without any collection, list the available collections.",
            schema: schemars::schema_for!(ListDirectoriesParams),
        },
        ToolDef {
            id: "get_metadata_by_id",
            description: "Fetch the location, language, definitions, and imports of an indexed \
                          chunk without its text.",
            schema: schemars::schema_for!(RecordLookupParams),
        },
        ToolDef {
            id: "get_content_by_id",
            description: "Fetch the full text and metadata of an indexed chunk.",
            schema: schemars::schema_for!(RecordLookupParams),
        },
        ToolDef {
            id: "search_vector_database",
            description: "Semantic search over indexed source code. Returns the best matching \
                          chunks with their record ids and scores.",
            schema: schemars::schema_for!(SearchParams),
        },
    ]
}

/// Validates tool calls and runs them against a shared [`Retriever`].
///
/// Holds no per-review state: the collection under review is passed to each
/// [`dispatch`](Self::dispatch).
pub struct ToolGateway<E: Embedder> {
    retriever: Arc<Retriever<E>>,
    registry: ToolRegistry,
    timeout: Duration,
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ToolError> {
    serde_json::to_string_pretty(value).map_err(|e| ToolError::Backend(e.to_string()))
}

impl<E: Embedder> ToolGateway<E> {
    #[must_use]
    pub fn new(retriever: Arc<Retriever<E>>, timeout: Duration) -> Self {
        Self {
            retriever,
            registry: ToolRegistry::new(retrieval_tools()),
            timeout,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run `call`, turning every failure into an error [`ToolResult`].
    pub async fn dispatch(&self, call: &ToolCall, default_collection: Option<&str>) -> ToolResult {
        let start = Instant::now();
        let outcome = if self.registry.find(&call.tool_id).is_none() {
            Err(ToolError::UnknownTool {
                tool_id: call.tool_id.clone(),
            })
        } else {
            match tokio::time::timeout(self.timeout, self.execute(call, default_collection)).await
            {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout {
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        };
        let elapsed_ms = start.elapsed().as_millis();
        match outcome {
            Ok(content) => {
                tracing::debug!(tool = %call.tool_id, call_id = %call.id, elapsed_ms, "tool call ok");
                ToolResult::ok(call, truncate_tool_output(&content))
            }
            Err(e) => {
                tracing::warn!(tool = %call.tool_id, call_id = %call.id, elapsed_ms, error = %e, "tool call failed");
                ToolResult::error(call, &e)
            }
        }
    }

    async fn execute(
        &self,
        call: &ToolCall,
        default_collection: Option<&str>,
    ) -> Result<String, ToolError> {
        match call.tool_id.as_str() {
            "list_directories" => {
                let p: ListDirectoriesParams = deserialize_params(&call.params)?;
                match p.collection_name.as_deref().or(default_collection) {
                    Some(collection) => {
                        let paths = self.retriever.list_paths(collection).await?;
                        to_json(&serde_json::json!({ "collection": collection, "paths": paths }))
                    }
                    None => {
                        let collections = self.retriever.list_collections().await?;
                        to_json(&serde_json::json!({ "collections": collections }))
                    }
                }
            }
            "get_metadata_by_id" => {
                let p: RecordLookupParams = deserialize_params(&call.params)?;
                let meta = self
                    .retriever
                    .get_metadata(&p.record_id, p.collection_name.as_deref())
                    .await?;
                to_json(&meta)
            }
            "get_content_by_id" => {
                let p: RecordLookupParams = deserialize_params(&call.params)?;
                let content = self
                    .retriever
                    .get_content(&p.record_id, p.collection_name.as_deref())
                    .await?;
                to_json(&content)
            }
            "search_vector_database" => {
                let p: SearchParams = deserialize_params(&call.params)?;
                let limit = p.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
                if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
                    return Err(ToolError::InvalidParams {
                        message: format!("limit must be between 1 and {MAX_SEARCH_LIMIT}, got {limit}"),
                    });
                }
                if p.query.trim().is_empty() {
                    return Err(ToolError::InvalidParams {
                        message: "query must not be empty".into(),
                    });
                }
                let limit = limit as usize;
                let hits = match p.collection_name.as_deref().or(default_collection) {
                    Some(collection) => self.retriever.search(collection, &p.query, limit).await?,
                    None => {
                        let mut hits = self.retriever.search_all(&p.query, limit).await?;
                        hits.truncate(limit);
                        hits
                    }
                };
                to_json(&hits)
            }
            other => Err(ToolError::UnknownTool {
                tool_id: other.to_owned(),
            }),
        }
    }
}
