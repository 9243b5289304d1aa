//! Observable run events.
//!
//! The orchestrator reports each state it enters and leaves, and the
//! generator forwards every text fragment it streams. Events are a one-way
//! copy of what happened: nothing a consumer does with them reaches back
//! into the run.

use crate::node::Node;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while a run progresses.
///
/// Serialized with a `type` tag:
/// - `node_start` — a state begins
/// - `node_end`   — that state completed, with its state update as `output`
/// - `token`      — an incremental text fragment from the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    NodeStart { node: Node },
    NodeEnd { node: Node, output: serde_json::Value },
    Token { content: String },
}

impl AgentEvent {
    /// Event name for transports that label events (e.g. SSE `event:`).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NodeStart { .. } => "node_start",
            Self::NodeEnd { .. } => "node_end",
            Self::Token { .. } => "token",
        }
    }
}

/// Sending half of a run's event stream.
///
/// The channel is unbounded so a slow or absent consumer never stalls the
/// run; a dropped receiver just turns emission into a no-op.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl EventEmitter {
    /// An emitter and the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// An emitter that discards everything.
    pub fn silent() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn node_start(&self, node: Node) {
        self.emit(AgentEvent::NodeStart { node });
    }

    pub fn node_end(&self, node: Node, output: serde_json::Value) {
        self.emit(AgentEvent::NodeEnd { node, output });
    }

    pub fn token(&self, content: impl Into<String>) {
        self.emit(AgentEvent::Token {
            content: content.into(),
        });
    }
}
