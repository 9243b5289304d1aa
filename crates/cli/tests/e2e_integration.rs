//! End-to-end integration tests for the DeepCritic research agent.
//!
//! These tests drive the full pipeline from user query to accepted answer:
//! generation, tool execution through the configured registry, critique and
//! the iteration cap.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deepcritic_agent::{AgentError, AgentEvent, Node, Orchestrator, RunHandle};
use deepcritic_config::AppConfig;
use deepcritic_core::error::{ProviderError, ToolError};
use deepcritic_core::message::{Message, MessageToolCall, Role};
use deepcritic_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage,
};
use deepcritic_core::tool::{Tool, ToolRegistry, ToolResult};
use deepcritic_tools::local_search::{INDEX_FILE, IndexedChunk};

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that replays scripted generator replies and critiques.
///
/// Requests carrying a `response_format` are critic calls; everything else
/// is a generator call. Once a queue runs dry its last entry repeats.
struct ScriptedProvider {
    replies: Mutex<VecDeque<ProviderResponse>>,
    critiques: Mutex<VecDeque<String>>,
    last_reply: Mutex<Option<ProviderResponse>>,
    last_critique: Mutex<Option<String>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<ProviderResponse>, critiques: Vec<(u8, &str)>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            critiques: Mutex::new(
                critiques
                    .into_iter()
                    .map(|(score, feedback)| {
                        serde_json::json!({"score": score, "feedback": feedback}).to_string()
                    })
                    .collect(),
            ),
            last_reply: Mutex::new(None),
            last_critique: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn generator_calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.response_format.is_none())
            .count()
    }

    fn next_reply(&self) -> ProviderResponse {
        let next = self.replies.lock().unwrap().pop_front();
        let mut last = self.last_reply.lock().unwrap();
        if let Some(reply) = next {
            *last = Some(reply);
        }
        last.clone().expect("ScriptedProvider has no generator replies")
    }

    fn next_critique(&self) -> String {
        let next = self.critiques.lock().unwrap().pop_front();
        let mut last = self.last_critique.lock().unwrap();
        if let Some(critique) = next {
            *last = Some(critique);
        }
        last.clone().expect("ScriptedProvider has no critiques")
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let is_critic = request.response_format.is_some();
        self.requests.lock().unwrap().push(request);
        if is_critic {
            Ok(response(Message::assistant(self.next_critique())))
        } else {
            Ok(self.next_reply())
        }
    }

    /// Two-dimensional keyword embedding: (mentions tokio, mentions serde).
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        let embeddings = request
            .inputs
            .iter()
            .map(|text| {
                let text = text.to_lowercase();
                vec![
                    f32::from(u8::from(text.contains("tokio"))),
                    f32::from(u8::from(text.contains("serde"))),
                ]
            })
            .collect();
        Ok(EmbeddingResponse {
            embeddings,
            model: request.model,
        })
    }
}

fn response(message: Message) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock".into(),
        metadata: serde_json::Map::new(),
    }
}

fn text_reply(text: &str) -> ProviderResponse {
    response(Message::assistant(text))
}

fn tool_reply(calls: Vec<MessageToolCall>) -> ProviderResponse {
    let mut message = Message::assistant("");
    message.tool_calls = calls;
    response(message)
}

fn search_call(id: &str, tool: &str, query: &str) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: tool.into(),
        arguments: serde_json::json!({ "query": query }).to_string(),
    }
}

// ── Mock web search ──────────────────────────────────────────────────────

/// Stands in for `tavily_search` with a canned result set.
struct CannedWebSearch;

#[async_trait]
impl Tool for CannedWebSearch {
    fn name(&self) -> &str {
        "tavily_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let results = serde_json::json!([{
            "title": format!("Results for {query}"),
            "url": "https://tokio.rs/blog",
            "content": "Tokio 1.40 was released."
        }]);
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: results.to_string(),
            data: Some(results),
        })
    }
}

fn web_registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CannedWebSearch));
    Arc::new(registry)
}

/// Drain every event of a streamed run.
async fn collect_events(mut handle: RunHandle) -> (Vec<AgentEvent>, RunHandle) {
    let mut events = Vec::new();
    while let Some(event) = handle.recv().await {
        events.push(event);
    }
    (events, handle)
}

// ── E2E: Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_direct_answer_accepted() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_reply("4")], vec![(5, "")]));
    let orchestrator = Orchestrator::new(provider.clone(), web_registry(), "mock");

    let outcome = orchestrator.run("What is 2+2?").await.unwrap();

    assert_eq!(outcome.answer, "4");
    assert_eq!(outcome.critique.score, 5);
    assert_eq!(outcome.agent_invocations, 1);
    assert_eq!(provider.generator_calls(), 1);
    assert_eq!(outcome.node_trace, vec![Node::Agent, Node::Critic]);
}

#[tokio::test]
async fn e2e_search_reject_then_accept() {
    let provider = Arc::new(ScriptedProvider::new(
        vec![
            tool_reply(vec![search_call("call_1", "tavily_search", "latest tokio release")]),
            text_reply("Tokio 1.40 is the latest release."),
            text_reply("Tokio 1.40 is the latest release [https://tokio.rs/blog]."),
        ],
        vec![(3, "Cite the source URL."), (5, "")],
    ));
    let orchestrator = Orchestrator::new(provider.clone(), web_registry(), "mock");

    let outcome = orchestrator
        .run("What is the latest tokio release?")
        .await
        .unwrap();

    assert_eq!(outcome.agent_invocations, 3);
    assert_eq!(provider.generator_calls(), 3);
    assert!(outcome.answer.contains("https://tokio.rs/blog"));

    let roles: Vec<Role> = outcome.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::User,       // query
            Role::Assistant,  // tool request
            Role::ToolResult, // search results
            Role::Assistant,  // first answer
            Role::User,       // critique 3/5
            Role::Assistant,  // revised answer
            Role::User,       // critique 5/5
        ]
    );
    assert!(outcome.messages[2].content.contains("Tokio 1.40 was released."));
    assert!(outcome.messages[4].content.starts_with("[Critique] Score: 3/5."));
}

#[tokio::test]
async fn e2e_never_satisfied_returns_best_answer() {
    let provider = Arc::new(ScriptedProvider::new(
        vec![text_reply("Probably 4.")],
        vec![(3, "Be definitive.")],
    ));
    let orchestrator = Orchestrator::new(provider.clone(), web_registry(), "mock").with_max_iterations(4);

    let err = orchestrator.run("What is 2+2?").await.unwrap_err();

    assert!(matches!(err, AgentError::BudgetExceeded { iterations: 4, .. }));
    assert_eq!(err.best_answer(), Some("Probably 4."));
    assert!(err.user_message().contains("Probably 4."));
    assert_eq!(provider.generator_calls(), 4);
}

#[tokio::test]
async fn e2e_unknown_tool_becomes_error_result() {
    let provider = Arc::new(ScriptedProvider::new(
        vec![
            tool_reply(vec![search_call("call_1", "stock_prices", "ACME")]),
            text_reply("I have no tool for stock prices."),
        ],
        vec![(5, "")],
    ));
    let orchestrator = Orchestrator::new(provider, web_registry(), "mock");

    let outcome = orchestrator.run("ACME share price?").await.unwrap();

    let tool_result = &outcome.messages[2];
    assert_eq!(tool_result.role, Role::ToolResult);
    assert_eq!(tool_result.tool_call_id.as_deref(), Some("call_1"));
    assert!(tool_result.content.contains("Tool not found: stock_prices"));
    assert_eq!(outcome.answer, "I have no tool for stock prices.");
}

#[tokio::test]
async fn e2e_streamed_run_reports_every_node() {
    let provider = Arc::new(ScriptedProvider::new(
        vec![
            tool_reply(vec![search_call("call_1", "tavily_search", "tokio")]),
            text_reply("Tokio 1.40."),
        ],
        vec![(5, "")],
    ));
    let orchestrator = Orchestrator::new(provider, web_registry(), "mock");

    let (events, handle) = collect_events(orchestrator.run_stream("Latest tokio?")).await;
    let outcome = handle.finish().await.unwrap();

    let starts: Vec<Node> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::NodeStart { node } => Some(*node),
            _ => None,
        })
        .collect();
    assert_eq!(starts, outcome.node_trace);
    assert_eq!(starts, vec![Node::Agent, Node::Tools, Node::Agent, Node::Critic]);

    let tokens: String = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Token { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tokens, "Tokio 1.40.");
}

#[tokio::test]
async fn e2e_local_mode_searches_the_codebase_index() {
    let dir = tempfile::tempdir().unwrap();
    let index = vec![
        IndexedChunk {
            content: "fn spawn_worker() { tokio::spawn(work()); }".into(),
            source: "src/worker.rs".into(),
            embedding: vec![1.0, 0.0],
        },
        IndexedChunk {
            content: "#[derive(Serialize)] struct Report;".into(),
            source: "src/report.rs".into(),
            embedding: vec![0.0, 1.0],
        },
    ];
    std::fs::write(dir.path().join(INDEX_FILE), serde_json::to_string(&index).unwrap()).unwrap();

    let mut config = AppConfig::default();
    config.use_local = true;
    config.tools.vector_store_dir = dir.path().to_string_lossy().into_owned();

    let provider = Arc::new(ScriptedProvider::new(
        vec![
            tool_reply(vec![search_call("call_1", "local_codebase_search", "where do we use tokio")]),
            text_reply("Workers are spawned in src/worker.rs."),
        ],
        vec![(5, "")],
    ));
    let tools = Arc::new(deepcritic_tools::registry_from_config(&config, provider.clone()));
    assert_eq!(tools.names(), vec!["local_codebase_search"]);

    let orchestrator = Orchestrator::from_config(&config, provider, tools);
    let outcome = orchestrator.run("Where do we spawn tokio tasks?").await.unwrap();

    let hits: Vec<serde_json::Value> = serde_json::from_str(&outcome.messages[2].content).unwrap();
    assert_eq!(hits[0]["source"], "src/worker.rs");
    assert_eq!(outcome.answer, "Workers are spawned in src/worker.rs.");
}

#[tokio::test]
async fn e2e_local_mode_without_index_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.use_local = true;
    config.tools.vector_store_dir = dir.path().join("missing").to_string_lossy().into_owned();

    let provider = Arc::new(ScriptedProvider::new(
        vec![
            tool_reply(vec![search_call("call_1", "local_codebase_search", "tokio")]),
            text_reply("The codebase index is unavailable."),
        ],
        vec![(5, "")],
    ));
    let tools = Arc::new(deepcritic_tools::registry_from_config(&config, provider.clone()));
    let outcome = Orchestrator::new(provider, tools, "llama3")
        .run("Where is tokio used?")
        .await
        .unwrap();

    assert!(outcome.messages[2].content.starts_with("Error searching codebase:"));
    assert_eq!(outcome.answer, "The codebase index is unavailable.");
}
