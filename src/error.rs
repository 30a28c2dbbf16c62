use thiserror::Error;

use crate::model::SessionId;

/// Errors surfaced across the interceptor / retriever boundary.
///
/// Only `ConfigurationConflict` and `Cancelled` are fatal to the caller;
/// everything else is soft-handled internally to preserve conversational
/// continuity (see the policy column of each variant's doc comment).
#[derive(Error, Debug)]
pub enum InterceptorError {
    /// The reserved search-tool name collides with a configured tool, or a
    /// required component (a `ToolSearcher`) is missing at build time.
    /// Fatal: surfaced to the caller, never recovered from.
    #[error("configuration conflict: {0}")]
    ConfigurationConflict(String),

    /// A retriever back-end could not index or search (I/O or embedding
    /// failure). Retried once with backoff inside `index_tool`; repeated
    /// failure skips the entry. `find_tools` never returns this variant —
    /// it degrades to an empty result with a warning in the metadata.
    #[error("retriever back-end unavailable for session '{session_id}': {source}")]
    BackendUnavailable {
        session_id: SessionId,
        #[source]
        source: anyhow::Error,
    },

    /// A `toolSearchTool` tool-response message did not parse as a JSON
    /// array of strings. The response is dropped; the loop continues.
    #[error("malformed tool-search response: {0}")]
    MalformedSearchResponse(String),

    /// The model named a tool absent from the session's callback registry.
    /// Dropped silently from the advertised set; the model can search again.
    #[error("unknown tool referenced: {0}")]
    UnknownToolReferenced(String),

    /// `max_turns` was reached without the model returning a plain message.
    #[error("loop budget exceeded after {max_turns} turns")]
    LoopBudgetExceeded { max_turns: usize },

    /// The caller cancelled or timed out the top-level request.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_conflict_message_contains_detail() {
        let err = InterceptorError::ConfigurationConflict("toolSearchTool".to_string());
        assert!(err.to_string().contains("toolSearchTool"));
    }

    #[test]
    fn loop_budget_exceeded_message_contains_count() {
        let err = InterceptorError::LoopBudgetExceeded { max_turns: 10 };
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn backend_unavailable_wraps_source() {
        let err = InterceptorError::BackendUnavailable {
            session_id: "s1".to_string(),
            source: anyhow::anyhow!("disk full"),
        };
        let msg = err.to_string();
        assert!(msg.contains("s1"));
        assert!(msg.contains("disk full"));
    }
}
