//! The interceptor: rewrites outbound requests to hide inactive tools,
//! injects the search tool, inspects responses for newly discovered tool
//! names, and drives the multi-turn loop until the model stops calling
//! tools or the turn budget runs out.
//!
//! `before`/`after` plus the `initialize_loop`/`finalize_loop` boundary are
//! kept as literal standalone methods — a host embedding this crate into its
//! own advisor pipeline calls them directly, one per turn, the same way the
//! teacher's `BackendManager` exposes both a one-shot `call_tool` and the
//! pieces a caller can recompose. `run_loop` is the self-contained driver for
//! hosts that don't have their own turn loop already, grounded on the pack's
//! generic `run_tool_loop`: a bounded `for` over turns, per-turn tracing, and
//! a `LoopOutcome` that distinguishes a clean stop from hitting `max_turns`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::InterceptorConfig;
use crate::error::InterceptorError;
use crate::llm::{ChatMessage, ChatRequest, ChatResponse, LlmTransport, Role, ToolCallRequest, ToolExecutor};
use crate::model::{SessionId, ToolCallback};
use crate::retriever::{IndexedTool, ToolSearcher};
use crate::search_tool::{search_tool_definition, ToolSearchCallback};
use crate::session::SessionStore;

/// How a `run_loop` call ended.
#[derive(Debug, Clone)]
pub enum LoopOutcome {
    /// The model returned a plain message with no further tool calls.
    Completed { response: ChatResponse, turns: usize },
    /// `max_turns` was reached while the model still wanted to call tools.
    /// `response` is the last turn's response, carried through unchanged.
    BudgetExceeded { response: ChatResponse, turns: usize },
}

impl LoopOutcome {
    pub fn response(&self) -> &ChatResponse {
        match self {
            LoopOutcome::Completed { response, .. } | LoopOutcome::BudgetExceeded { response, .. } => response,
        }
    }

    pub fn turns(&self) -> usize {
        match self {
            LoopOutcome::Completed { turns, .. } | LoopOutcome::BudgetExceeded { turns, .. } => *turns,
        }
    }

    pub fn budget_exceeded(&self) -> bool {
        matches!(self, LoopOutcome::BudgetExceeded { .. })
    }
}

/// Executes a tool call by looking its callback up in a session's registry.
/// The search tool's own callback lives in the same registry, so this
/// executes it exactly like any other tool.
pub struct DefaultToolExecutor {
    sessions: Arc<SessionStore>,
    session_id: SessionId,
}

impl DefaultToolExecutor {
    pub fn new(sessions: Arc<SessionStore>, session_id: SessionId) -> Self {
        Self { sessions, session_id }
    }
}

#[async_trait]
impl ToolExecutor for DefaultToolExecutor {
    async fn execute(&self, call: &ToolCallRequest) -> anyhow::Result<String> {
        let Some(callback) = self.sessions.find_callback(&self.session_id, &call.name) else {
            tracing::warn!(session_id = %self.session_id, tool = %call.name, "model called an unregistered tool");
            return Ok(serde_json::json!({"error": format!("unknown tool '{}'", call.name)}).to_string());
        };
        match callback.handler.call(call.arguments.clone()).await {
            Ok(value) => Ok(value.to_string()),
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, tool = %call.name, error = %e, "tool call failed");
                Ok(serde_json::json!({"error": e.to_string()}).to_string())
            }
        }
    }
}

/// Derive the session id for one top-level request: the caller's
/// `conversation_id` if present (SPEC_FULL §4.3 step 1, "from the request's
/// context, key conversationId"), else a fresh UUID. Used by
/// `ToolSearchInterceptor::run_loop_from_request`; a caller that already
/// tracks its own session ids can skip this and call `run_loop` directly.
pub fn derive_session_id(request: &ChatRequest) -> SessionId {
    request
        .options
        .conversation_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Parse the trailing run of `Role::Tool` messages for search-tool responses,
/// returning every name they named. A message that fails to parse as a JSON
/// array of strings is dropped with a warning — it never fails the loop.
fn extract_search_results(messages: &[ChatMessage], search_tool_name: &str) -> Vec<String> {
    let mut trailing = Vec::new();
    for msg in messages.iter().rev() {
        if msg.role == Role::Tool {
            trailing.push(msg);
        } else {
            break;
        }
    }
    trailing.reverse();

    let mut names = Vec::new();
    for msg in trailing {
        if msg.name.as_deref() != Some(search_tool_name) {
            continue;
        }
        let Some(content) = &msg.content else { continue };
        match serde_json::from_str::<Vec<String>>(content) {
            Ok(parsed) => names.extend(parsed),
            Err(_) => {
                tracing::warn!(content = %content, "malformed search-tool response; dropping");
            }
        }
    }
    names
}

/// Guarantees `finalize_loop` runs even if the `run_loop`/`run_loop_cancellable`
/// future is dropped mid-flight — the normal way a host enforces a timeout on
/// an `async fn` (`tokio::time::timeout`, or simply dropping the join handle).
/// `Drop` can't `.await`, so a dropped-while-armed guard spawns the cleanup as
/// a detached task instead of running it inline; the happy path disarms the
/// guard after calling `finalize_loop` itself, so that spawn never happens
/// there. `clear_index`/`end_session` are idempotent, so a guard that fires
/// after an already-finalized session is harmless.
struct FinalizeGuard {
    searcher: Arc<dyn ToolSearcher>,
    sessions: Arc<SessionStore>,
    session_id: SessionId,
    armed: bool,
}

impl FinalizeGuard {
    fn new(interceptor: &ToolSearchInterceptor, session_id: SessionId) -> Self {
        Self {
            searcher: interceptor.searcher.clone(),
            sessions: interceptor.sessions.clone(),
            session_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(session_id = %self.session_id, "run_loop dropped before finishing; finalizing session from drop guard");
        let searcher = self.searcher.clone();
        let sessions = self.sessions.clone();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            searcher.clear_index(&session_id).await;
            sessions.end_session(&session_id);
        });
    }
}

pub struct ToolSearchInterceptor {
    searcher: Arc<dyn ToolSearcher>,
    sessions: Arc<SessionStore>,
    config: InterceptorConfig,
}

impl ToolSearchInterceptor {
    pub fn new(searcher: Arc<dyn ToolSearcher>, config: InterceptorConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { searcher, sessions: Arc::new(SessionStore::new()), config })
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        self.sessions.clone()
    }

    /// Index every configured tool, cache its callback, and reserve the
    /// search-tool name. Must run exactly once per top-level request.
    pub async fn initialize_loop(&self, session_id: &SessionId, tools: Vec<ToolCallback>) -> Result<(), InterceptorError> {
        if tools.iter().any(|t| t.name() == self.config.search_tool_name) {
            return Err(InterceptorError::ConfigurationConflict(format!(
                "tool name '{}' collides with the reserved search tool name",
                self.config.search_tool_name
            )));
        }

        for callback in tools {
            let make_indexed = || IndexedTool::new(callback.name().to_string(), callback.definition.description.clone());
            if let Err(first_err) = self.searcher.index_tool(session_id, make_indexed()).await {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if let Err(retry_err) = self.searcher.index_tool(session_id, make_indexed()).await {
                    tracing::warn!(
                        session_id = %session_id,
                        tool = callback.name(),
                        first_error = %first_err,
                        retry_error = %retry_err,
                        "failed to index tool twice; skipping"
                    );
                    continue;
                }
            }
            self.sessions.register_callback(session_id, callback);
        }

        let search_callback = ToolCallback::new(
            search_tool_definition(&self.config.search_tool_name),
            Arc::new(ToolSearchCallback::new(session_id.clone(), self.searcher.clone(), self.config.max_results)),
        );
        self.sessions.register_callback(session_id, search_callback);
        Ok(())
    }

    /// Append (or create) the system message instructing the model how to
    /// use the search tool.
    pub fn augment_system_message(&self, messages: &mut Vec<ChatMessage>) {
        if let Some(first) = messages.first_mut() {
            if first.role == Role::System {
                let existing = first.content.take().unwrap_or_default();
                first.content = Some(format!("{existing}\n\n{}", self.config.system_message_suffix));
                return;
            }
        }
        messages.insert(
            0,
            ChatMessage {
                role: Role::System,
                content: Some(self.config.system_message_suffix.clone()),
                tool_calls: Vec::new(),
                tool_call_id: None,
                name: None,
            },
        );
    }

    /// Rewrite `request` for one LLM turn: promote newly named tools into
    /// `DiscoveredSet`, then advertise only the search tool plus whatever is
    /// currently discovered.
    pub fn before(&self, session_id: &SessionId, request: &ChatRequest) -> ChatRequest {
        let mut rewritten = request.clone();

        let newly_named = extract_search_results(&rewritten.messages, &self.config.search_tool_name);
        self.sessions.record_discovered(session_id, newly_named, self.config.discovery_mode());

        let mut tools = vec![search_tool_definition(&self.config.search_tool_name)];
        for callback in self.sessions.advertised_callbacks(session_id) {
            if callback.name() != self.config.search_tool_name {
                tools.push(callback.definition.clone());
            }
        }
        rewritten.tools = tools;
        rewritten
    }

    /// Whether the outer loop needs another turn.
    pub fn after(&self, response: &ChatResponse) -> bool {
        response.has_tool_calls()
    }

    /// Release all per-session state. Idempotent.
    pub async fn finalize_loop(&self, session_id: &SessionId) {
        self.searcher.clear_index(session_id).await;
        self.sessions.end_session(session_id);
    }

    /// Run a complete top-level request through `initialize_loop` → repeated
    /// `before`/transport/`after` → `finalize_loop`, executing tool calls via
    /// `executor` along the way. `session_id` is the caller's to choose; use
    /// `run_loop_from_request` to derive one from `ChatRequest.options.conversation_id`
    /// instead.
    pub async fn run_loop(
        &self,
        session_id: SessionId,
        tools: Vec<ToolCallback>,
        mut messages: Vec<ChatMessage>,
        transport: &dyn LlmTransport,
        executor: &dyn ToolExecutor,
    ) -> anyhow::Result<LoopOutcome> {
        let guard = FinalizeGuard::new(self, session_id.clone());

        self.initialize_loop(&session_id, tools).await?;
        self.augment_system_message(&mut messages);

        let outcome = self.drive(&session_id, ChatRequest::new(messages), transport, executor).await;

        self.finalize_loop(&session_id).await;
        guard.disarm();
        outcome
    }

    /// `run_loop`, deriving the session id from `request.options.conversation_id`
    /// via `derive_session_id` (SPEC_FULL §4.3 step 1) instead of taking one
    /// from the caller.
    pub async fn run_loop_from_request(
        &self,
        tools: Vec<ToolCallback>,
        request: ChatRequest,
        transport: &dyn LlmTransport,
        executor: &dyn ToolExecutor,
    ) -> anyhow::Result<LoopOutcome> {
        let session_id = derive_session_id(&request);
        self.run_loop(session_id, tools, request.messages, transport, executor).await
    }

    /// `run_loop`, but races the loop against `cancel`: if `cancel` resolves
    /// first, the loop stops and this returns `InterceptorError::Cancelled`
    /// (SPEC_FULL §5/§7). `finalize_loop` runs before returning either way —
    /// a host still needs `FinalizeGuard` on top of this for the case where
    /// it drops the whole future instead of resolving `cancel` (e.g.
    /// `tokio::time::timeout`), which is exactly what this method already
    /// sets up via the same guard `run_loop` uses.
    pub async fn run_loop_cancellable(
        &self,
        session_id: SessionId,
        tools: Vec<ToolCallback>,
        mut messages: Vec<ChatMessage>,
        transport: &dyn LlmTransport,
        executor: &dyn ToolExecutor,
        cancel: impl std::future::Future<Output = ()> + Send,
    ) -> anyhow::Result<LoopOutcome> {
        let guard = FinalizeGuard::new(self, session_id.clone());

        self.initialize_loop(&session_id, tools).await?;
        self.augment_system_message(&mut messages);

        let result = tokio::select! {
            biased;
            outcome = self.drive(&session_id, ChatRequest::new(messages), transport, executor) => outcome,
            _ = cancel => {
                tracing::warn!(session_id = %session_id, "run_loop cancelled by caller");
                Err(InterceptorError::Cancelled(format!("run_loop cancelled for session '{session_id}'")).into())
            }
        };

        self.finalize_loop(&session_id).await;
        guard.disarm();
        result
    }

    async fn drive(
        &self,
        session_id: &SessionId,
        mut request: ChatRequest,
        transport: &dyn LlmTransport,
        executor: &dyn ToolExecutor,
    ) -> anyhow::Result<LoopOutcome> {
        tracing::info!(session_id = %session_id, max_turns = self.config.max_turns, "starting tool-search loop");

        for turn in 1..=self.config.max_turns {
            let rewritten = self.before(session_id, &request);
            tracing::debug!(session_id = %session_id, turn, advertised = rewritten.tools.len(), "sending turn");

            let response = transport.send(rewritten).await?;

            if !self.after(&response) {
                tracing::info!(session_id = %session_id, turns = turn, "loop completed");
                return Ok(LoopOutcome::Completed { response, turns: turn });
            }

            if turn == self.config.max_turns {
                tracing::warn!(session_id = %session_id, turns = turn, "loop budget exceeded");
                return Ok(LoopOutcome::BudgetExceeded { response, turns: turn });
            }

            request.messages.push(response.message.clone());
            for call in &response.message.tool_calls {
                let result = executor.execute(call).await?;
                request.messages.push(ChatMessage::tool_result(call.id.clone(), call.name.clone(), result));
            }
        }

        unreachable!("loop always returns on or before turn == max_turns")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ToolDefinition, ToolHandler};
    use crate::retriever::keyword::KeywordSearcher;
    use serde_json::Value;
    use std::sync::Mutex;

    struct Noop;

    #[async_trait]
    impl ToolHandler for Noop {
        async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
            Ok(arguments)
        }
    }

    fn callback(name: &str, description: &str) -> ToolCallback {
        ToolCallback::new(ToolDefinition::new(name, description, serde_json::json!({})), Arc::new(Noop))
    }

    fn interceptor() -> ToolSearchInterceptor {
        ToolSearchInterceptor::new(Arc::new(KeywordSearcher::new()), InterceptorConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn initialize_loop_rejects_reserved_name_collision() {
        let interceptor = interceptor();
        let err = interceptor
            .initialize_loop(&"s1".to_string(), vec![callback("toolSearchTool", "collides")])
            .await
            .unwrap_err();
        assert!(matches!(err, InterceptorError::ConfigurationConflict(_)));
    }

    #[tokio::test]
    async fn before_always_advertises_search_tool_even_with_nothing_discovered() {
        let interceptor = interceptor();
        let session = "s1".to_string();
        interceptor.initialize_loop(&session, vec![callback("weather", "Get the weather")]).await.unwrap();

        let request = ChatRequest::new(vec![ChatMessage::user("hi")]);
        let rewritten = interceptor.before(&session, &request);

        assert_eq!(rewritten.tools.len(), 1);
        assert_eq!(rewritten.tools[0].name, "toolSearchTool");
    }

    #[tokio::test]
    async fn before_promotes_names_from_trailing_search_tool_response() {
        let interceptor = interceptor();
        let session = "s1".to_string();
        interceptor
            .initialize_loop(&session, vec![callback("weather", "Get the weather for a location")])
            .await
            .unwrap();

        let request = ChatRequest::new(vec![
            ChatMessage::user("what should I wear"),
            ChatMessage::assistant(
                None,
                vec![ToolCallRequest { id: "1".into(), name: "toolSearchTool".into(), arguments: serde_json::json!({}) }],
            ),
            ChatMessage::tool_result("1", "toolSearchTool", "[\"weather\"]"),
        ]);
        let rewritten = interceptor.before(&session, &request);

        assert_eq!(rewritten.tools.len(), 2);
        assert!(rewritten.tools.iter().any(|t| t.name == "weather"));
    }

    #[tokio::test]
    async fn unknown_tool_reference_is_dropped_not_fatal() {
        let interceptor = interceptor();
        let session = "s1".to_string();
        interceptor.initialize_loop(&session, vec![callback("weather", "Get the weather")]).await.unwrap();

        let request = ChatRequest::new(vec![
            ChatMessage::tool_result("1", "toolSearchTool", "[\"weather\",\"hallucinatedTool\"]"),
        ]);
        let rewritten = interceptor.before(&session, &request);

        assert_eq!(rewritten.tools.len(), 2); // search tool + weather, hallucinatedTool dropped
    }

    #[tokio::test]
    async fn malformed_search_response_is_dropped_not_fatal() {
        let interceptor = interceptor();
        let session = "s1".to_string();
        interceptor.initialize_loop(&session, vec![callback("weather", "Get the weather")]).await.unwrap();

        let request = ChatRequest::new(vec![ChatMessage::tool_result("1", "toolSearchTool", "not-a-json-array")]);
        let rewritten = interceptor.before(&session, &request);

        assert_eq!(rewritten.tools.len(), 1); // only the search tool; nothing promoted
    }

    #[tokio::test]
    async fn finalize_loop_clears_index_and_session() {
        let interceptor = interceptor();
        let session = "s1".to_string();
        interceptor.initialize_loop(&session, vec![callback("weather", "Get the weather")]).await.unwrap();
        interceptor.finalize_loop(&session).await;

        assert!(!interceptor.sessions.is_known_tool(&session, "weather"));
    }

    /// Scripted transport replaying a fixed sequence of responses, grounded
    /// on the pack's provider-trait test doubles.
    struct ScriptedTransport {
        responses: Mutex<Vec<ChatResponse>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self { responses: Mutex::new(responses.into_iter().rev().collect()) }
        }
    }

    #[async_trait]
    impl LlmTransport for ScriptedTransport {
        async fn send(&self, _request: ChatRequest) -> anyhow::Result<ChatResponse> {
            self.responses.lock().unwrap().pop().ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    fn search_call(id: &str, query: &str) -> ChatResponse {
        ChatResponse {
            message: ChatMessage::assistant(
                None,
                vec![ToolCallRequest { id: id.into(), name: "toolSearchTool".into(), arguments: serde_json::json!({"query": query}) }],
            ),
        }
    }

    fn final_message(text: &str) -> ChatResponse {
        ChatResponse { message: ChatMessage::assistant(Some(text.into()), Vec::new()) }
    }

    #[tokio::test]
    async fn run_loop_end_to_end_cold_start() {
        let searcher: Arc<dyn ToolSearcher> = Arc::new(KeywordSearcher::new());
        let interceptor = ToolSearchInterceptor::new(searcher, InterceptorConfig::default()).unwrap();
        let session = "s1".to_string();

        let tools = vec![
            callback("weather", "Get the weather for a given location"),
            callback("currentTime", "Current date and time"),
            callback("clothing", "Clothing shops open at a time"),
        ];

        let transport = ScriptedTransport::new(vec![
            search_call("1", "current time"),
            final_message("It's 72F and sunny, wear a light jacket."),
        ]);
        let executor = DefaultToolExecutor::new(interceptor.sessions(), session.clone());

        let outcome = interceptor
            .run_loop(session, tools, vec![ChatMessage::user("What should I wear in Landsmeer now?")], &transport, &executor)
            .await
            .unwrap();

        assert!(matches!(outcome, LoopOutcome::Completed { .. }));
        assert_eq!(outcome.turns(), 2);
    }

    #[tokio::test]
    async fn run_loop_reports_budget_exceeded() {
        let searcher: Arc<dyn ToolSearcher> = Arc::new(KeywordSearcher::new());
        let config = InterceptorConfig::builder().max_turns(2).build().unwrap();
        let interceptor = ToolSearchInterceptor::new(searcher, config).unwrap();
        let session = "s1".to_string();

        let transport = ScriptedTransport::new(vec![search_call("1", "anything"), search_call("2", "anything")]);
        let executor = DefaultToolExecutor::new(interceptor.sessions(), session.clone());

        let outcome = interceptor
            .run_loop(session, vec![callback("weather", "Get the weather")], vec![ChatMessage::user("hi")], &transport, &executor)
            .await
            .unwrap();

        assert!(outcome.budget_exceeded());
        assert_eq!(outcome.turns(), 2);
    }

    #[tokio::test]
    async fn cross_session_isolation_during_concurrent_loops() {
        let searcher: Arc<dyn ToolSearcher> = Arc::new(KeywordSearcher::new());
        let interceptor = Arc::new(ToolSearchInterceptor::new(searcher, InterceptorConfig::default()).unwrap());

        interceptor.initialize_loop(&"a".to_string(), vec![callback("alpha", "Alpha-only capability")]).await.unwrap();
        interceptor.initialize_loop(&"b".to_string(), vec![callback("beta", "Beta-only capability")]).await.unwrap();

        let request_a = ChatRequest::new(vec![ChatMessage::tool_result("1", "toolSearchTool", "[\"beta\"]")]);
        let rewritten_a = interceptor.before(&"a".to_string(), &request_a);
        assert!(!rewritten_a.tools.iter().any(|t| t.name == "beta"));

        let request_b = ChatRequest::new(vec![ChatMessage::tool_result("1", "toolSearchTool", "[\"beta\"]")]);
        let rewritten_b = interceptor.before(&"b".to_string(), &request_b);
        assert!(rewritten_b.tools.iter().any(|t| t.name == "beta"));
    }

    #[test]
    fn derive_session_id_uses_conversation_id_when_present() {
        let mut request = ChatRequest::new(vec![ChatMessage::user("hi")]);
        request.options.conversation_id = Some("conv-42".to_string());
        assert_eq!(derive_session_id(&request), "conv-42");
    }

    #[test]
    fn derive_session_id_generates_distinct_uuids_when_absent() {
        let request_a = ChatRequest::new(vec![ChatMessage::user("hi")]);
        let request_b = ChatRequest::new(vec![ChatMessage::user("hi")]);
        let a = derive_session_id(&request_a);
        let b = derive_session_id(&request_b);
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[tokio::test]
    async fn run_loop_from_request_uses_the_derived_session_for_tool_execution() {
        let searcher: Arc<dyn ToolSearcher> = Arc::new(KeywordSearcher::new());
        let interceptor = ToolSearchInterceptor::new(searcher, InterceptorConfig::default()).unwrap();

        let mut request = ChatRequest::new(vec![ChatMessage::user("hi")]);
        request.options.conversation_id = Some("conv-99".to_string());

        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        struct Flag(Arc<std::sync::atomic::AtomicBool>);
        #[async_trait]
        impl ToolHandler for Flag {
            async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
                self.0.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(arguments)
            }
        }
        let weather = ToolCallback::new(
            ToolDefinition::new("weather", "Get the weather", serde_json::json!({})),
            Arc::new(Flag(called.clone())),
        );

        let transport = ScriptedTransport::new(vec![
            ChatResponse {
                message: ChatMessage::assistant(
                    None,
                    vec![ToolCallRequest { id: "1".into(), name: "weather".into(), arguments: serde_json::json!({}) }],
                ),
            },
            final_message("done"),
        ]);
        // Bound to the same id the request carries as `conversation_id` — if
        // `run_loop_from_request` derived a different session, this executor
        // would never find the registered callback.
        let executor = DefaultToolExecutor::new(interceptor.sessions(), "conv-99".to_string());

        let outcome = interceptor
            .run_loop_from_request(vec![weather], request, &transport, &executor)
            .await
            .unwrap();

        assert!(matches!(outcome, LoopOutcome::Completed { .. }));
        assert!(called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_loop_cancellable_returns_cancelled_error_and_still_finalizes() {
        let searcher: Arc<dyn ToolSearcher> = Arc::new(KeywordSearcher::new());
        let interceptor = ToolSearchInterceptor::new(searcher, InterceptorConfig::default()).unwrap();
        let session = "s1".to_string();

        // A transport that never resolves, forcing the cancel branch to win.
        struct Stalling;
        #[async_trait]
        impl LlmTransport for Stalling {
            async fn send(&self, _request: ChatRequest) -> anyhow::Result<ChatResponse> {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
        let executor = DefaultToolExecutor::new(interceptor.sessions(), session.clone());

        let result = interceptor
            .run_loop_cancellable(
                session.clone(),
                vec![callback("weather", "Get the weather")],
                vec![ChatMessage::user("hi")],
                &Stalling,
                &executor,
                async { /* cancel immediately */ },
            )
            .await;

        let err = result.unwrap_err();
        assert!(err.downcast_ref::<InterceptorError>().map(|e| matches!(e, InterceptorError::Cancelled(_))).unwrap_or(false));
        assert!(!interceptor.sessions.is_known_tool(&session, "weather"));
    }

    #[tokio::test]
    async fn dropping_run_loop_mid_flight_still_finalizes_the_session() {
        let searcher: Arc<dyn ToolSearcher> = Arc::new(KeywordSearcher::new());
        let interceptor = Arc::new(ToolSearchInterceptor::new(searcher, InterceptorConfig::default()).unwrap());
        let session = "s1".to_string();

        struct Stalling;
        #[async_trait]
        impl LlmTransport for Stalling {
            async fn send(&self, _request: ChatRequest) -> anyhow::Result<ChatResponse> {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }

        {
            let interceptor = interceptor.clone();
            let session = session.clone();
            let fut = async move {
                let executor = DefaultToolExecutor::new(interceptor.sessions(), session.clone());
                interceptor
                    .run_loop(session, vec![callback("weather", "Get the weather")], vec![ChatMessage::user("hi")], &Stalling, &executor)
                    .await
            };
            // Drop the future instead of awaiting it, the same way a
            // `tokio::time::timeout` wrapper would on expiry.
            tokio::time::timeout(Duration::from_millis(1), fut).await.unwrap_err();
        }

        // The guard's spawned cleanup task needs a scheduling point to run.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(!interceptor.sessions.is_known_tool(&session, "weather"));
    }
}
