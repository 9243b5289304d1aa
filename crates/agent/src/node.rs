//! The states of a run and the transition table between them.

use crate::state::AgentState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A state the orchestrator can be in while a run is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    /// The generator
    Agent,
    /// The tool executor
    Tools,
    /// The critique evaluator
    Critic,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Tools => "tools",
            Self::Critic => "critic",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the run goes after a node completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Next(Node),
    End,
}

/// Pick the next state from the node that just ran and the state it left.
pub fn route(from: Node, state: &AgentState) -> Transition {
    match from {
        Node::Agent if state.latest().has_tool_calls() => Transition::Next(Node::Tools),
        Node::Agent => Transition::Next(Node::Critic),
        Node::Tools => Transition::Next(Node::Agent),
        Node::Critic => match state.critique() {
            Some(critique) if critique.is_accepted() => Transition::End,
            _ => Transition::Next(Node::Agent),
        },
    }
}
