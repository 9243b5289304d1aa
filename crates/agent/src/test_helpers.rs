//! Shared test helpers: a scripted provider and a couple of tools.

use async_trait::async_trait;
use deepcritic_core::error::{ProviderError, ToolError};
use deepcritic_core::message::{Message, MessageToolCall};
use deepcritic_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use deepcritic_core::tool::{Tool, ToolResult};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

enum Scripted {
    Reply(Message),
    Fail(ProviderError),
}

/// A provider that plays back scripted generator turns and critic replies.
///
/// Requests with a `response_format` are critic calls and are served from
/// the critique script; everything else is a generator call. When a script
/// runs dry the matching `always_*` fallback is used, and without one the
/// provider panics.
#[derive(Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Scripted>>,
    critiques: Mutex<VecDeque<Scripted>>,
    always_answer: Option<String>,
    always_critique: Option<String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain-text generator turn.
    pub fn answer(self, text: &str) -> Self {
        self.turn(Scripted::Reply(Message::assistant(text)))
    }

    /// Queue a generator turn that requests tools.
    pub fn tool_calls(self, text: &str, calls: Vec<MessageToolCall>) -> Self {
        let mut msg = Message::assistant(text);
        msg.tool_calls = calls;
        self.turn(Scripted::Reply(msg))
    }

    /// Queue a failing generator turn.
    pub fn failure(self, error: ProviderError) -> Self {
        self.turn(Scripted::Fail(error))
    }

    /// Queue a well-formed critique.
    pub fn critique(self, score: u8, feedback: &str) -> Self {
        let raw = serde_json::json!({ "score": score, "feedback": feedback }).to_string();
        self.raw_critique(&raw)
    }

    /// Queue a critic reply verbatim.
    pub fn raw_critique(self, raw: &str) -> Self {
        lock(&self.critiques).push_back(Scripted::Reply(Message::assistant(raw)));
        self
    }

    /// Answer every unscripted generator turn with `text`.
    pub fn always_answer(mut self, text: &str) -> Self {
        self.always_answer = Some(text.to_string());
        self
    }

    /// Give every unscripted critique this score.
    pub fn always_critique(mut self, score: u8, feedback: &str) -> Self {
        self.always_critique =
            Some(serde_json::json!({ "score": score, "feedback": feedback }).to_string());
        self
    }

    /// Wait this long before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }

    /// Number of generator (non-critic) calls received.
    pub fn generator_calls(&self) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.response_format.is_none())
            .count()
    }

    fn turn(self, scripted: Scripted) -> Self {
        lock(&self.turns).push_back(scripted);
        self
    }

    async fn next(&self, request: ProviderRequest) -> Result<Message, ProviderError> {
        let is_critic = request.response_format.is_some();
        lock(&self.requests).push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let (queue, fallback) = if is_critic {
            (&self.critiques, &self.always_critique)
        } else {
            (&self.turns, &self.always_answer)
        };

        let scripted = lock(queue).pop_front();
        match scripted {
            Some(Scripted::Reply(msg)) => Ok(msg),
            Some(Scripted::Fail(e)) => Err(e),
            None => match fallback {
                Some(text) => Ok(Message::assistant(text)),
                None => panic!(
                    "ScriptedProvider: no {} reply scripted",
                    if is_critic { "critic" } else { "generator" }
                ),
            },
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap()
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let message = self.next(request).await?;
        Ok(ProviderResponse {
            message,
            usage: Some(usage()),
            model,
            metadata: serde_json::Map::new(),
        })
    }

    /// Streams the reply word by word, tool calls on the final chunk.
    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let message = self.next(request).await?;
        let words: Vec<String> = message
            .content
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();

        let (tx, rx) = tokio::sync::mpsc::channel(words.len() + 1);
        for word in words {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(word),
                    tool_calls: Vec::new(),
                    done: false,
                    usage: None,
                }))
                .await;
        }
        let _ = tx
            .send(Ok(StreamChunk {
                content: None,
                tool_calls: message.tool_calls,
                done: true,
                usage: Some(usage()),
            }))
            .await;
        Ok(rx)
    }
}

/// Build a tool call.
pub fn tool_call(id: &str, name: &str, arguments: &str) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }
}

fn echo_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": { "text": { "type": "string" } },
        "required": ["text"]
    })
}

fn echo(arguments: &serde_json::Value) -> Result<ToolResult, ToolError> {
    let text = arguments["text"]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;
    Ok(ToolResult {
        call_id: String::new(),
        success: true,
        output: text.to_string(),
        data: None,
    })
}

/// Echoes its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        echo_schema()
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        echo(&arguments)
    }
}

/// Echoes its `text` argument after a pause.
pub struct SlowEchoTool;

#[async_trait]
impl Tool for SlowEchoTool {
    fn name(&self) -> &str {
        "slow_echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input, slowly"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        echo_schema()
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        echo(&arguments)
    }
}
