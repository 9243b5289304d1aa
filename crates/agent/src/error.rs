//! Run-level failures.

use deepcritic_core::critique::SchemaViolation;
use deepcritic_core::error::ProviderError;
use thiserror::Error;

/// Why a run ended without an accepted answer.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// The generation backend failed or timed out. Never retried here.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The critic's reply did not match the critique schema.
    #[error(transparent)]
    SchemaViolation(#[from] SchemaViolation),

    /// The generator was invoked `iterations` times without an accepted answer.
    #[error("Iteration budget exhausted after {iterations} generator passes")]
    BudgetExceeded {
        iterations: u32,
        /// Highest-scored answer seen, or the latest one if none was scored
        best_answer: Option<String>,
    },

    /// The run was aborted before it finished.
    #[error("Run cancelled")]
    Cancelled,

    #[error("Run failed: {0}")]
    Internal(String),
}

impl AgentError {
    /// One line explaining the failure, shown in place of a final answer.
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(ProviderError::Timeout(_)) => {
                "The language model did not respond in time. Please try again.".into()
            }
            Self::Provider(e) => format!("The language model could not be reached: {e}"),
            Self::SchemaViolation(e) => {
                format!("The answer could not be evaluated ({}).", e.reason)
            }
            Self::BudgetExceeded {
                iterations,
                best_answer: Some(answer),
            } => format!(
                "No answer passed review after {iterations} attempts. Best attempt:\n\n{answer}"
            ),
            Self::BudgetExceeded {
                iterations,
                best_answer: None,
            } => format!("No answer was produced within {iterations} attempts."),
            Self::Cancelled => "The run was cancelled.".into(),
            Self::Internal(reason) => format!("The run failed unexpectedly: {reason}"),
        }
    }

    /// The answer a caller can still show, if any.
    pub fn best_answer(&self) -> Option<&str> {
        match self {
            Self::BudgetExceeded { best_answer, .. } => best_answer.as_deref(),
            _ => None,
        }
    }
}
