//! Replays end-to-end scenario 1: a cold-start, non-accumulating loop where
//! the model discovers `currentTime` then `weather` through two rounds of
//! `toolSearchTool` calls before answering.
//!
//! Run with `cargo run --example basic`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use toolscope::{
    ChatMessage, ChatRequest, ChatResponse, InterceptorConfig, LlmTransport, LoopOutcome,
    SessionId, ToolCallback, ToolCallRequest, ToolDefinition, ToolHandler, ToolSearchInterceptor,
};
use toolscope::retriever::keyword::KeywordSearcher;
use toolscope::interceptor::DefaultToolExecutor;

struct FixedReply(serde_json::Value);

#[async_trait]
impl ToolHandler for FixedReply {
    async fn call(&self, _arguments: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        Ok(self.0.clone())
    }
}

fn demo_tool(name: &str, description: &str, reply: serde_json::Value) -> ToolCallback {
    ToolCallback::new(
        ToolDefinition::new(name, description, serde_json::json!({"type": "object", "properties": {}})),
        Arc::new(FixedReply(reply)),
    )
}

/// A scripted model: calls `toolSearchTool` twice, then answers in prose.
/// Mirrors the transport test doubles in `interceptor.rs`, just wired to a
/// runnable binary instead of an assertion.
struct ScriptedModel {
    turn: Mutex<usize>,
}

#[async_trait]
impl LlmTransport for ScriptedModel {
    async fn send(&self, request: ChatRequest) -> anyhow::Result<ChatResponse> {
        let mut turn = self.turn.lock().unwrap();
        *turn += 1;
        tracing::info!(turn = *turn, advertised = ?request.tools.iter().map(|t| &t.name).collect::<Vec<_>>(), "model sees request");

        let response = match *turn {
            1 => ChatResponse {
                message: ChatMessage::assistant(
                    None,
                    vec![ToolCallRequest {
                        id: "call_1".into(),
                        name: "toolSearchTool".into(),
                        arguments: serde_json::json!({"query": "current time"}),
                    }],
                ),
            },
            2 => ChatResponse {
                message: ChatMessage::assistant(
                    None,
                    vec![ToolCallRequest {
                        id: "call_2".into(),
                        name: "toolSearchTool".into(),
                        arguments: serde_json::json!({"query": "weather"}),
                    }],
                ),
            },
            _ => ChatResponse {
                message: ChatMessage::assistant(
                    Some("It's currently mild and clear in Landsmeer, a light jacket should do.".into()),
                    Vec::new(),
                ),
            },
        };
        Ok(response)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let searcher = Arc::new(KeywordSearcher::new());
    let config = InterceptorConfig::builder().accumulate_discovered(false).build()?;
    let interceptor = ToolSearchInterceptor::new(searcher, config)?;

    let tools = vec![
        demo_tool("weather", "Get the weather for a given location", serde_json::json!({"tempF": 58, "condition": "clear"})),
        demo_tool("currentTime", "Current date and time", serde_json::json!({"iso8601": "2026-08-01T21:00:00Z"})),
        demo_tool("clothing", "Clothing shops open at a time", serde_json::json!({"shops": []})),
    ];

    let session: SessionId = uuid::Uuid::new_v4().to_string();
    let executor = DefaultToolExecutor::new(interceptor.sessions(), session.clone());
    let transport = ScriptedModel { turn: Mutex::new(0) };

    let outcome = interceptor
        .run_loop(
            session,
            tools,
            vec![ChatMessage::user("What should I wear in Landsmeer now?")],
            &transport,
            &executor,
        )
        .await?;

    match outcome {
        LoopOutcome::Completed { response, turns } => {
            println!("completed in {turns} turns: {}", response.message.content.unwrap_or_default());
        }
        LoopOutcome::BudgetExceeded { turns, .. } => {
            println!("loop budget exceeded after {turns} turns");
        }
    }

    Ok(())
}
