//! Retrieval tools for the review agent: schemas, validation, and dispatch.

pub mod executor;
pub mod gateway;
pub mod registry;

pub use executor::{
    MAX_TOOL_OUTPUT_CHARS, ToolCall, ToolError, ToolResult, deserialize_params,
    truncate_tool_output,
};
pub use gateway::{DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT, ToolGateway, retrieval_tools};
pub use registry::{ToolDef, ToolRegistry};
