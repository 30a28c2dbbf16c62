//! Middleware that sits between a chat application and an LLM's tool-calling
//! API, hiding a large tool catalog behind one bootstrapping search tool so
//! the model's context window never carries more tool schemas than it has
//! actually asked for.
//!
//! Module layout follows the dependency order leaves-first: retriever
//! back-ends → the [`retriever`] interface they implement → [`session`]
//! state → [`search_tool`] → [`interceptor`], the component that drives all
//! of the above.

pub mod config;
pub mod error;
pub mod interceptor;
pub mod llm;
pub mod model;
pub mod retriever;
pub mod search_tool;
pub mod session;


pub use config::InterceptorConfig;
pub use error::InterceptorError;
pub use interceptor::{derive_session_id, LoopOutcome, ToolSearchInterceptor};
pub use llm::{ChatMessage, ChatRequest, ChatResponse, LlmTransport, Role, ToolCallRequest, ToolExecutor};
pub use model::{SessionId, ToolCallback, ToolDefinition, ToolHandler, ToolReference};
pub use retriever::{keyword::KeywordSearcher, regex::RegexSearcher, semantic::SemanticSearcher, ToolSearcher};
pub use search_tool::DEFAULT_SEARCH_TOOL_NAME;
