//! Critique evaluator node.
//!
//! Scores the latest answer against the original query with a fixed rubric.
//! The reply is constrained to [`Critique::schema`] and parsed strictly; a
//! reply that does not fit is fatal to the run.

use crate::error::AgentError;
use crate::state::{AgentState, StateUpdate};
use deepcritic_core::critique::Critique;
use deepcritic_core::message::Message;
use deepcritic_core::provider::{Provider, ProviderRequest, ResponseFormat};
use std::sync::Arc;
use tracing::debug;

/// Name of the structured-output schema sent to the provider.
pub const SCHEMA_NAME: &str = "critique";

#[derive(Clone)]
pub struct CriticNode {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: Option<u32>,
}

impl CriticNode {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Judge with a different model than the one generating.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The rubric prompt for one query/answer pair.
    pub fn prompt(query: &str, answer: &str) -> String {
        format!(
            "You are a strict technical critic.\n\
             Review the following answer to the user's query.\n\
             Query: {query}\n\n\
             Answer: {answer}\n\n\
             Rate it 1-5.\n\
             5 = Perfect, includes citations if needed, fully answers the prompt.\n\
             1 = Terrible, hallucinated or irrelevant.\n\n\
             Provide constructive feedback if not perfect."
        )
    }

    /// Score the latest answer; sets the critique and appends the critique turn.
    pub async fn run(&self, state: &AgentState) -> Result<StateUpdate, AgentError> {
        let query = &state.messages().query().content;
        let answer = state
            .latest_answer()
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let request = ProviderRequest {
            model: self.model.clone(),
            // Sent as a user turn: some backends reject a system-only request
            messages: vec![Message::user(Self::prompt(query, answer))],
            temperature: 0.0,
            max_tokens: self.max_tokens,
            tools: Vec::new(),
            response_format: Some(ResponseFormat {
                name: SCHEMA_NAME.into(),
                schema: Critique::schema(),
            }),
            stream: false,
        };

        let response = self.provider.complete(request).await?;
        let critique = Critique::parse(&response.message.content)?;

        debug!(score = critique.score, "Critique received");

        Ok(StateUpdate {
            messages: vec![critique.to_message()],
            critique: Some(critique),
        })
    }
}
