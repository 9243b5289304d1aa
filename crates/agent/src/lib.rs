//! The research agent: a generate → (tools) → critique loop.
//!
//! Each run starts from a user query and cycles through three nodes:
//!
//! 1. **Agent**: the [`Generator`] answers over the full history, tools bound
//! 2. **Tools**: the [`ToolExecutor`] runs any requested tool calls
//! 3. **Critic**: the [`CriticNode`] scores the answer 1–5
//!
//! A score of 5 ends the run; anything lower sends the critique back to the
//! generator. The [`Orchestrator`] enforces an iteration cap and streams
//! [`AgentEvent`]s while it works.

pub mod critic;
pub mod emitter;
pub mod error;
pub mod executor;
pub mod generator;
pub mod node;
pub mod orchestrator;
pub mod state;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use critic::CriticNode;
pub use emitter::{AgentEvent, EventEmitter};
pub use error::AgentError;
pub use executor::ToolExecutor;
pub use generator::Generator;
pub use node::{Node, Transition};
pub use orchestrator::{Orchestrator, RunHandle, RunOutcome, RunTask};
pub use state::{AgentState, StateUpdate};
