//! The bootstrapping tool-search tool: the one tool the model always sees,
//! used to discover the rest of the catalog on demand.
//!
//! The JSON-schema parameter struct follows the teacher's `SearchToolsParams`
//! shape in `server.rs` (`#[serde(default = "default_limit")]` on an optional
//! bound), and the brief result shape is modeled on `tools/discovery.rs`'s
//! `BriefSearchResult` — name plus a short description, nothing the model
//! doesn't need to decide what to search for next. The wire contract is
//! narrower than that, though: per `InterceptorError::MalformedSearchResponse`,
//! the tool's reply must parse back as a plain JSON array of tool names, so
//! that's what `ToolSearchCallback::call` returns — summaries and scores stay
//! internal to the retriever and are only used for tracing.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::model::{SessionId, ToolDefinition, ToolHandler};
use crate::retriever::{FindRequest, ToolSearcher};
use std::sync::Arc;

/// Reserved tool name; configuring a tool with this name is a
/// `ConfigurationConflict`.
pub const DEFAULT_SEARCH_TOOL_NAME: &str = "toolSearchTool";

#[derive(Debug, Deserialize)]
pub struct ToolSearchParams {
    pub query: String,
    #[serde(default, rename = "maxResults")]
    pub max_results: Option<u32>,
    #[serde(default, rename = "categoryFilter")]
    pub category_filter: Option<String>,
}

/// Build the `ToolDefinition` advertised for the search tool under `name`.
pub fn search_tool_definition(name: &str) -> ToolDefinition {
    ToolDefinition::new(
        name,
        "Search the available tool catalog for tools matching a natural-language \
         or pattern query. Returns a JSON array of tool names that become \
         callable on the next turn.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What capability you're looking for.",
                },
                "maxResults": {
                    "type": "integer",
                    "description": "Upper bound on returned tool names (default 5, max 10).",
                },
                "categoryFilter": {
                    "type": "string",
                    "description": "Restrict results to tools tagged with this category.",
                },
            },
            "required": ["query"],
        }),
    )
}

/// The search tool's handler: bound to one session and one retriever
/// back-end, so the interceptor can register it fresh per session without
/// either side knowing about the other's lifecycle.
pub struct ToolSearchCallback {
    session_id: SessionId,
    searcher: Arc<dyn ToolSearcher>,
    /// `InterceptorConfig::max_results`, used when a call omits `maxResults`.
    default_max_results: u32,
}

impl ToolSearchCallback {
    pub fn new(session_id: SessionId, searcher: Arc<dyn ToolSearcher>, default_max_results: u32) -> Self {
        Self { session_id, searcher, default_max_results }
    }
}

#[async_trait]
impl ToolHandler for ToolSearchCallback {
    async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
        let params: ToolSearchParams = serde_json::from_value(arguments)?;

        let mut req = FindRequest::new(self.session_id.clone(), params.query)
            .with_max_results(params.max_results.unwrap_or(self.default_max_results));
        if let Some(category) = params.category_filter {
            req = req.with_category_filter(category);
        }

        let response = self.searcher.find_tools(req).await;
        tracing::debug!(
            session_id = %self.session_id,
            search_type = ?response.metadata.search_type,
            matched = response.tool_references.len(),
            total_matches = response.total_matches,
            warning = ?response.metadata.warning,
            "tool search completed"
        );

        let names: Vec<Value> = response
            .tool_references
            .into_iter()
            .map(|r| Value::String(r.tool_name))
            .collect();
        Ok(Value::Array(names))
    }
}
