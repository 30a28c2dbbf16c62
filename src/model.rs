use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies one logical conversation. Derived by
/// `crate::interceptor::derive_session_id` from `ChatRequest.options.conversation_id`
/// when the caller routes through `run_loop_from_request`, or generated fresh
/// with `uuid::Uuid::new_v4` when absent; a caller driving `run_loop` directly
/// supplies its own.
pub type SessionId = String;

/// An external description of a callable tool. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// The host-side invocable half of a tool. The middleware never calls this
/// directly — it only advertises the `ToolDefinition` to the LLM and hands
/// the call off to whatever executes tool calls (see `crate::llm::ToolExecutor`).
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> anyhow::Result<Value>;
}

/// A `ToolDefinition` bound to its implementation.
#[derive(Clone)]
pub struct ToolCallback {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolCallback {
    pub fn new(definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Self {
        Self { definition, handler }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

impl std::fmt::Debug for ToolCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallback")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// A search result. Transient — only ever held for the span of one
/// `find_tools` call and its immediate consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolReference {
    pub tool_name: String,
    pub summary: String,
    pub relevance_score: f64,
}
