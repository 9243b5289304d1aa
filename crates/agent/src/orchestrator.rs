//! The orchestrator: drives one run through agent → [tools] → critic.
//!
//! ```text
//! start ─▶ agent ──tool calls──▶ tools ─▶ agent
//!            │
//!            └──no tool calls──▶ critic ──score > 4──▶ end
//!                                   └────score ≤ 4──▶ agent
//! ```
//!
//! Every run owns its [`AgentState`]; only the provider and tool registry
//! are shared, so independent runs can proceed concurrently.

use crate::critic::CriticNode;
use crate::emitter::{AgentEvent, EventEmitter};
use crate::error::AgentError;
use crate::executor::ToolExecutor;
use crate::generator::Generator;
use crate::node::{Node, Transition, route};
use crate::state::AgentState;
use deepcritic_config::AppConfig;
use deepcritic_core::critique::Critique;
use deepcritic_core::error::ProviderError;
use deepcritic_core::message::Message;
use deepcritic_core::provider::Provider;
use deepcritic_core::tool::ToolRegistry;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

const DEFAULT_MAX_ITERATIONS: u32 = 10;
const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(120);

/// The result of a run whose answer was accepted.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// The accepted answer
    pub answer: String,
    /// The critique that accepted it
    pub critique: Critique,
    /// The full conversation, query first
    pub messages: Vec<Message>,
    /// How many times the generator ran
    pub agent_invocations: u32,
    /// Every node visited, in order
    pub node_trace: Vec<Node>,
}

/// Coordinates the generator, tool executor and critic for each run.
#[derive(Clone)]
pub struct Orchestrator {
    generator: Generator,
    executor: ToolExecutor,
    critic: CriticNode,
    max_iterations: u32,
    provider_timeout: Duration,
}

impl Orchestrator {
    /// Create an orchestrator that generates and critiques with `model`.
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            generator: Generator::new(provider.clone(), &model, tools.definitions()),
            executor: ToolExecutor::new(tools),
            critic: CriticNode::new(provider, model),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Build from configuration: models, temperature, token limit, cap and timeout.
    pub fn from_config(config: &AppConfig, provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        Self::new(provider, tools, config.generation_model())
            .with_critic_model(config.critic_model())
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_max_iterations(config.agent.max_iterations)
            .with_provider_timeout(Duration::from_secs(config.agent.provider_timeout_secs))
            .with_tool_timeout(Duration::from_secs(config.tools.timeout_secs))
    }

    /// Use a different model for the critic.
    pub fn with_critic_model(mut self, model: impl Into<String>) -> Self {
        self.critic = self.critic.with_model(model);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.generator = self.generator.with_temperature(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.generator = self.generator.with_max_tokens(max_tokens);
        self.critic = self.critic.with_max_tokens(max_tokens);
        self
    }

    /// Cap the number of generator passes per run (at least 1).
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Bound every generation and critique call.
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Bound every tool call; a call that runs over is reported to the generator.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.executor = self.executor.with_timeout(timeout);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Answer `query`, discarding events.
    pub async fn run(&self, query: &str) -> Result<RunOutcome, AgentError> {
        self.run_with_emitter(query, &EventEmitter::silent()).await
    }

    /// Answer `query` on a background task, streaming its events.
    pub fn run_stream(&self, query: &str) -> RunHandle {
        let (emitter, events) = EventEmitter::channel();
        let orchestrator = self.clone();
        let query = query.to_string();
        let task = tokio::spawn(async move { orchestrator.run_with_emitter(&query, &emitter).await });
        RunHandle {
            events,
            task: RunTask { task },
        }
    }

    /// Answer `query`, reporting progress through `emitter`.
    pub async fn run_with_emitter(&self, query: &str, emitter: &EventEmitter) -> Result<RunOutcome, AgentError> {
        let mut state = AgentState::new(query);
        let run_id = state.messages().id.clone();
        let mut node = Node::Agent;
        let mut agent_invocations = 0u32;
        let mut node_trace = Vec::new();
        let mut answers = AnswerTracker::default();

        info!(
            run_id = %run_id,
            model = self.generator.model(),
            max_iterations = self.max_iterations,
            "Run started"
        );

        loop {
            if node == Node::Agent && agent_invocations >= self.max_iterations {
                warn!(
                    run_id = %run_id,
                    iterations = agent_invocations,
                    "Iteration budget exhausted without an accepted answer"
                );
                return Err(AgentError::BudgetExceeded {
                    iterations: agent_invocations,
                    best_answer: answers.best(),
                });
            }

            debug!(run_id = %run_id, node = %node, "Entering node");
            emitter.node_start(node);
            node_trace.push(node);

            let update = match node {
                Node::Agent => {
                    agent_invocations += 1;
                    self.bounded(async {
                        self.generator
                            .run(&state, emitter)
                            .await
                            .map_err(AgentError::from)
                    })
                    .await?
                }
                Node::Tools => self.executor.run(&state).await,
                Node::Critic => self.bounded(self.critic.run(&state)).await?,
            };

            emitter.node_end(node, update.to_output());
            state.apply(update);

            match node {
                Node::Agent if !state.latest().has_tool_calls() => {
                    answers.candidate(&state.latest().content);
                }
                Node::Critic => {
                    if let Some(critique) = state.critique() {
                        answers.scored(critique.score);
                    }
                }
                _ => {}
            }

            match route(node, &state) {
                Transition::Next(next) => node = next,
                Transition::End => break,
            }
        }

        let critique = state
            .critique()
            .cloned()
            .ok_or_else(|| AgentError::Internal("run ended without a critique".into()))?;
        let answer = answers.latest().unwrap_or_default();

        info!(
            run_id = %run_id,
            agent_invocations,
            score = critique.score,
            messages = state.messages().len(),
            "Run finished"
        );

        Ok(RunOutcome {
            answer,
            critique,
            messages: state.messages().to_vec(),
            agent_invocations,
            node_trace,
        })
    }

    /// Apply the provider timeout to one node's work.
    async fn bounded<T>(&self, work: impl Future<Output = Result<T, AgentError>>) -> Result<T, AgentError> {
        match tokio::time::timeout(self.provider_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Provider(ProviderError::Timeout(format!(
                "no response within {}s",
                self.provider_timeout.as_secs()
            )))),
        }
    }
}

/// Remembers candidate answers and how they scored.
#[derive(Debug, Default)]
struct AnswerTracker {
    latest: Option<String>,
    best: Option<(u8, String)>,
}

impl AnswerTracker {
    fn candidate(&mut self, answer: &str) {
        self.latest = Some(answer.to_string());
    }

    /// Record the critique of the latest candidate; later answers win ties.
    fn scored(&mut self, score: u8) {
        let Some(answer) = &self.latest else {
            return;
        };
        if self.best.as_ref().is_none_or(|(best, _)| score >= *best) {
            self.best = Some((score, answer.clone()));
        }
    }

    fn latest(&self) -> Option<String> {
        self.latest.clone()
    }

    /// The highest-scored answer, or the latest if none was scored.
    fn best(&self) -> Option<String> {
        self.best
            .as_ref()
            .map(|(_, answer)| answer.clone())
            .or_else(|| self.latest.clone())
    }
}

/// A run executing on a background task, with its event stream.
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<AgentEvent>,
    task: RunTask,
}

impl RunHandle {
    /// The next event, or `None` once the run has finished and all events are read.
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        self.events.recv().await
    }

    /// Split into an event stream and the task that yields the result.
    pub fn into_stream(self) -> (UnboundedReceiverStream<AgentEvent>, RunTask) {
        (UnboundedReceiverStream::new(self.events), self.task)
    }

    /// Wait for the result, discarding unread events.
    pub async fn finish(self) -> Result<RunOutcome, AgentError> {
        self.task.finish().await
    }

    /// Stop the run at its next suspension point.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// The background task behind a [`RunHandle`].
pub struct RunTask {
    task: JoinHandle<Result<RunOutcome, AgentError>>,
}

impl RunTask {
    pub async fn finish(self) -> Result<RunOutcome, AgentError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(AgentError::Cancelled),
            Err(e) => Err(AgentError::Internal(e.to_string())),
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{EchoTool, ScriptedProvider, SlowEchoTool, tool_call};
    use deepcritic_core::message::Role;
    use tokio_stream::StreamExt;

    fn orchestrator(provider: Arc<ScriptedProvider>) -> Orchestrator {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(SlowEchoTool));
        Orchestrator::new(provider, Arc::new(registry), "mock-model")
    }

    #[tokio::test]
    async fn direct_answer_accepted_first_time() {
        let provider = Arc::new(ScriptedProvider::new().answer("4").critique(5, "Correct."));
        let outcome = orchestrator(provider.clone()).run("What is 2+2?").await.unwrap();

        assert_eq!(outcome.answer, "4");
        assert_eq!(outcome.critique.score, 5);
        assert_eq!(outcome.agent_invocations, 1);
        assert_eq!(outcome.node_trace, vec![Node::Agent, Node::Critic]);
        assert_eq!(provider.generator_calls(), 1);

        // query, answer, critique turn
        assert_eq!(outcome.messages.len(), 3);
        assert_eq!(outcome.messages[0].role, Role::User);
        assert_eq!(outcome.messages[0].content, "What is 2+2?");
        assert!(outcome.messages[2].content.starts_with("[Critique] Score: 5/5"));
    }

    #[tokio::test]
    async fn tool_round_then_rejection_then_acceptance() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .tool_calls("", vec![tool_call("call_1", "echo", r#"{"text":"search results"}"#)])
                .answer("Draft without sources.")
                .critique(3, "Add citations.")
                .answer("Final answer [1].")
                .critique(5, ""),
        );
        let outcome = orchestrator(provider).run("Latest tokio release?").await.unwrap();

        assert_eq!(outcome.answer, "Final answer [1].");
        assert_eq!(outcome.agent_invocations, 3);
        assert_eq!(
            outcome.node_trace,
            vec![Node::Agent, Node::Tools, Node::Agent, Node::Critic, Node::Agent, Node::Critic]
        );

        let tool_result = &outcome.messages[2];
        assert_eq!(tool_result.role, Role::ToolResult);
        assert_eq!(tool_result.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_result.content, "search results");
    }

    #[tokio::test]
    async fn later_passes_see_the_critique() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .answer("v1")
                .critique(2, "Too vague.")
                .answer("v2")
                .critique(5, ""),
        );
        orchestrator(provider.clone()).run("q").await.unwrap();

        let second_pass = provider
            .requests()
            .into_iter()
            .filter(|r| r.response_format.is_none())
            .nth(1)
            .unwrap();
        let last = second_pass.messages.last().unwrap();
        assert_eq!(last.content, "[Critique] Score: 2/5. Feedback: Too vague.");
    }

    #[tokio::test]
    async fn never_satisfied_critic_hits_the_cap() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .always_answer("Maybe 4?")
                .always_critique(3, "Unsure."),
        );
        let err = orchestrator(provider.clone())
            .with_max_iterations(3)
            .run("What is 2+2?")
            .await
            .unwrap_err();

        match err {
            AgentError::BudgetExceeded {
                iterations,
                best_answer,
            } => {
                assert_eq!(iterations, 3);
                assert_eq!(best_answer.as_deref(), Some("Maybe 4?"));
            }
            other => panic!("expected BudgetExceeded, got {other:?}"),
        }
        assert_eq!(provider.generator_calls(), 3);
    }

    #[tokio::test]
    async fn budget_keeps_the_best_scored_answer() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .answer("weak")
                .critique(2, "weak")
                .answer("strong")
                .critique(4, "almost")
                .answer("regressed")
                .critique(1, "worse"),
        );
        let err = orchestrator(provider).with_max_iterations(3).run("q").await.unwrap_err();
        assert_eq!(err.best_answer(), Some("strong"));
    }

    #[tokio::test]
    async fn endless_tool_calls_are_bounded_too() {
        let mut provider = ScriptedProvider::new();
        for i in 0..2 {
            provider = provider.tool_calls(
                "",
                vec![tool_call(&format!("call_{i}"), "echo", r#"{"text":"again"}"#)],
            );
        }
        let err = orchestrator(Arc::new(provider))
            .with_max_iterations(2)
            .run("q")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::BudgetExceeded {
                iterations: 2,
                best_answer: None
            }
        ));
    }

    #[tokio::test]
    async fn unknown_tool_is_recovered() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .tool_calls("", vec![tool_call("call_1", "weather", r#"{"city":"Oslo"}"#)])
                .answer("I cannot check the weather.")
                .critique(5, ""),
        );
        let outcome = orchestrator(provider).run("Weather in Oslo?").await.unwrap();
        assert!(outcome.messages[2].content.contains("Tool not found: weather"));
        assert_eq!(outcome.answer, "I cannot check the weather.");
    }

    #[tokio::test]
    async fn provider_failure_aborts_the_run() {
        let provider = Arc::new(ScriptedProvider::new().failure(ProviderError::AuthenticationFailed("bad key".into())));
        let err = orchestrator(provider).run("q").await.unwrap_err();
        assert!(matches!(err, AgentError::Provider(ProviderError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn schema_violation_aborts_the_run() {
        let provider = Arc::new(ScriptedProvider::new().answer("4").raw_critique("looks fine to me"));
        let err = orchestrator(provider).run("q").await.unwrap_err();
        assert!(matches!(err, AgentError::SchemaViolation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .answer("late")
                .with_delay(Duration::from_secs(300)),
        );
        let err = orchestrator(provider)
            .with_provider_timeout(Duration::from_secs(120))
            .run("q")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Provider(ProviderError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_tool_is_reported_and_the_run_continues() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .tool_calls("", vec![tool_call("call_1", "slow_echo", r#"{"text":"late"}"#)])
                .answer("Search timed out, answering from memory.")
                .critique(5, ""),
        );
        let outcome = orchestrator(provider)
            .with_tool_timeout(Duration::from_millis(10))
            .run("q")
            .await
            .unwrap();

        assert!(outcome.messages[2].content.contains("Tool timed out: slow_echo"));
        assert_eq!(outcome.answer, "Search timed out, answering from memory.");
        assert_eq!(outcome.node_trace, vec![Node::Agent, Node::Tools, Node::Agent, Node::Critic]);
    }

    #[tokio::test]
    async fn event_stream_is_ordered_and_paired() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .tool_calls("", vec![tool_call("call_1", "echo", r#"{"text":"r"}"#)])
                .answer("The answer is 4")
                .critique(5, ""),
        );
        let handle = orchestrator(provider).run_stream("What is 2+2?");
        let (events, task) = handle.into_stream();
        let events: Vec<AgentEvent> = events.collect().await;
        let outcome = task.finish().await.unwrap();
        assert_eq!(outcome.answer, "The answer is 4");

        // Node boundaries never interleave and tokens sit inside an agent pair
        let mut open: Option<Node> = None;
        let mut tokens = String::new();
        let mut sequence = Vec::new();
        for event in &events {
            match event {
                AgentEvent::NodeStart { node } => {
                    assert!(open.is_none(), "{node} started inside another node");
                    open = Some(*node);
                    sequence.push(format!("start:{node}"));
                }
                AgentEvent::NodeEnd { node, .. } => {
                    assert_eq!(open.take(), Some(*node));
                    sequence.push(format!("end:{node}"));
                }
                AgentEvent::Token { content } => {
                    assert_eq!(open, Some(Node::Agent));
                    tokens.push_str(content);
                }
            }
        }
        assert_eq!(tokens, "The answer is 4");
        assert_eq!(
            sequence,
            vec![
                "start:agent", "end:agent", "start:tools", "end:tools",
                "start:agent", "end:agent", "start:critic", "end:critic",
            ]
        );

        // The critic's node_end carries its state update
        let AgentEvent::NodeEnd { output, .. } = &events[events.len() - 1] else {
            panic!("last event should be node_end");
        };
        assert_eq!(output["critique"]["score"], 5);
    }

    #[tokio::test]
    async fn dropping_the_receiver_does_not_affect_the_run() {
        let provider = Arc::new(ScriptedProvider::new().answer("4").critique(5, ""));
        let handle = orchestrator(provider).run_stream("q");
        let (events, task) = handle.into_stream();
        drop(events);
        assert_eq!(task.finish().await.unwrap().answer, "4");
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_run_reports_cancellation() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .answer("never")
                .with_delay(Duration::from_secs(60)),
        );
        let handle = orchestrator(provider).run_stream("q");
        handle.abort();
        assert!(matches!(handle.finish().await, Err(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn concurrent_runs_are_isolated() {
        let provider = Arc::new(ScriptedProvider::new().always_answer("same").always_critique(5, ""));
        let orch = orchestrator(provider);
        let (a, b) = tokio::join!(orch.run("first query"), orch.run("second query"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.messages[0].content, "first query");
        assert_eq!(b.messages[0].content, "second query");
        assert_eq!(a.messages.len(), 3);
        assert_eq!(b.messages.len(), 3);
    }

    #[test]
    fn tracker_prefers_later_answer_on_ties() {
        let mut tracker = AnswerTracker::default();
        assert_eq!(tracker.best(), None);
        tracker.candidate("a");
        tracker.scored(3);
        tracker.candidate("b");
        tracker.scored(3);
        tracker.candidate("c");
        assert_eq!(tracker.best().as_deref(), Some("b"));
        assert_eq!(tracker.latest().as_deref(), Some("c"));
    }
}
