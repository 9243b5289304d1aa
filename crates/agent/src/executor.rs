//! Tool executor node.

use crate::state::{AgentState, StateUpdate};
use deepcritic_core::error::ToolError;
use deepcritic_core::message::{Message, MessageToolCall};
use deepcritic_core::tool::{ToolRegistry, ToolResult};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct ToolExecutor {
    tools: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Bound every individual tool call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run every tool call of the latest message concurrently.
    ///
    /// Produces exactly one tool-result message per call, in the order the
    /// calls were issued. Failures, unknown tools included, come back as
    /// error text so the generator can react to them.
    pub async fn run(&self, state: &AgentState) -> StateUpdate {
        let calls = &state.latest().tool_calls;
        debug!(count = calls.len(), "Executing tool calls");

        let results = join_all(calls.iter().map(|call| self.invoke(call))).await;

        StateUpdate {
            messages: calls
                .iter()
                .zip(results)
                .map(|(call, result)| Message::tool_result(&call.id, result.output))
                .collect(),
            critique: None,
        }
    }

    /// A call that outlives the timeout becomes an error result like any other failure.
    async fn invoke(&self, call: &MessageToolCall) -> ToolResult {
        match tokio::time::timeout(self.timeout, self.tools.invoke(call)).await {
            Ok(result) => result,
            Err(_) => {
                let error = ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: self.timeout.as_secs(),
                };
                warn!(tool = %call.name, error = %error, "Tool call abandoned");
                ToolResult::failure(&call.id, &error)
            }
        }
    }
}
