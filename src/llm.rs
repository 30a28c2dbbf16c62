//! Chat wire types and the two collaborator traits the interceptor drives:
//! [`LlmTransport`] (sends a turn to the model) and [`ToolExecutor`] (runs a
//! tool call the model asked for). Both are `async_trait` boundaries, the
//! same shape the teacher uses for `BackendHandle`/`HealthCheck` — injected
//! collaborators the core logic never constructs itself.
//!
//! The multi-turn driver itself (`crate::interceptor::ToolSearchInterceptor::run_loop`)
//! is grounded on the pack's generic `ToolLoopProvider`/`run_tool_loop` for its
//! round budget and per-round logging; it diverges on how the budget running
//! out is reported (see `crate::interceptor` for why).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::ToolDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One request for the model to invoke a tool, as returned in an assistant
/// turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One message in a conversation. `tool_call_id`/`name` are set only on
/// `Role::Tool` messages answering a prior `ToolCallRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Per-request knobs that influence how the interceptor shapes the outbound
/// request; distinct from `InterceptorConfig`, which is process-wide.
#[derive(Debug, Clone, Default)]
pub struct ToolCallingOptions {
    /// Caller-supplied conversation id. `ToolSearchInterceptor::run_loop_from_request`
    /// uses this as the session id, generating one with `uuid::Uuid::new_v4`
    /// when absent (see `crate::interceptor::derive_session_id`).
    pub conversation_id: Option<String>,
}

/// An outbound request, before or after interception.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub options: ToolCallingOptions,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            options: ToolCallingOptions::default(),
        }
    }
}

/// What the model returned for one turn.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: ChatMessage,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        self.message.has_tool_calls()
    }
}

/// Sends a prepared request to the model and returns its reply. The
/// interceptor never talks to a concrete provider SDK directly — this is the
/// seam a real integration implements.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn send(&self, request: ChatRequest) -> anyhow::Result<ChatResponse>;
}

/// Executes one tool call the model asked for and returns its result as the
/// `Role::Tool` message content string.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCallRequest) -> anyhow::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_has_no_tool_calls() {
        let msg = ChatMessage::user("hello");
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn assistant_message_with_calls_reports_true() {
        let msg = ChatMessage::assistant(
            None,
            vec![ToolCallRequest { id: "1".into(), name: "weather".into(), arguments: serde_json::json!({}) }],
        );
        assert!(msg.has_tool_calls());
    }

    #[test]
    fn tool_result_carries_call_id_and_name() {
        let msg = ChatMessage::tool_result("call_1", "weather", "{\"tempF\":72}");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("weather"));
        assert_eq!(msg.role, Role::Tool);
    }

    #[test]
    fn chat_response_delegates_has_tool_calls() {
        let resp = ChatResponse { message: ChatMessage::user("hi") };
        assert!(!resp.has_tool_calls());
    }
}
