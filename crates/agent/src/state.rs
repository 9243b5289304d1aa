//! Per-run agent state and the reducers that are its only writers.

use deepcritic_core::critique::Critique;
use deepcritic_core::message::{Message, MessageLog};
use serde::{Deserialize, Serialize};

/// Everything one run knows: the conversation so far and the live critique.
#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    messages: MessageLog,
    critique: Option<Critique>,
}

/// What a node returns; merged into [`AgentState`] by [`AgentState::apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Appended to the log, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,

    /// Replaces the live critique when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critique: Option<Critique>,
}

impl StateUpdate {
    pub fn message(message: Message) -> Self {
        Self {
            messages: vec![message],
            critique: None,
        }
    }

    /// JSON rendering carried by `node_end` events.
    pub fn to_output(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl AgentState {
    /// A fresh state holding only the user's query.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            messages: MessageLog::seeded(query),
            critique: None,
        }
    }

    /// Merge a node's update: messages concatenate, critique is last-write-wins.
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        if let Some(critique) = update.critique {
            self.critique = Some(critique);
        }
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn critique(&self) -> Option<&Critique> {
        self.critique.as_ref()
    }

    /// The most recent message.
    pub fn latest(&self) -> &Message {
        self.messages.last()
    }

    /// The most recent assistant turn, if the generator has run.
    pub fn latest_answer(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == deepcritic_core::message::Role::Assistant)
    }
}
