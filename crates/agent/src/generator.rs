//! Generator node: one provider call over the full history, tools bound.

use crate::emitter::EventEmitter;
use crate::state::{AgentState, StateUpdate};
use deepcritic_core::error::ProviderError;
use deepcritic_core::message::{Message, MessageToolCall};
use deepcritic_core::provider::{Provider, ProviderRequest, ToolDefinition};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct Generator {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Vec<ToolDefinition>,
}

impl Generator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
            tools,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Stream one reply, forwarding each text fragment as a `token` event.
    ///
    /// The reply is a single assistant message. When it carries tool calls
    /// it is a tool request, whatever text came with it.
    pub async fn run(
        &self,
        state: &AgentState,
        emitter: &EventEmitter,
    ) -> Result<StateUpdate, ProviderError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: state.messages().to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: self.tools.clone(),
            response_format: None,
            stream: true,
        };

        let mut stream_rx = self.provider.stream(request).await?;

        let mut content = String::new();
        let mut tool_calls: Vec<MessageToolCall> = Vec::new();

        while let Some(chunk) = stream_rx.recv().await {
            let chunk = chunk?;

            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                content.push_str(&text);
                emitter.token(text);
            }

            tool_calls.extend(chunk.tool_calls);

            if chunk.done {
                break;
            }
        }

        debug!(
            provider = self.provider.name(),
            chars = content.len(),
            tool_calls = tool_calls.len(),
            "Generator reply complete"
        );

        let mut message = Message::assistant(content);
        message.tool_calls = tool_calls;
        Ok(StateUpdate::message(message))
    }
}
