//! Critique — the evaluator's structured verdict on a candidate answer.
//!
//! A critique is only ever produced by parsing a provider reply that was
//! constrained to [`Critique::schema`]. Parsing is strict: a reply that does
//! not satisfy the schema is a [`SchemaViolation`], never a guessed default.

use crate::message::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest score the rubric allows.
pub const MIN_SCORE: u8 = 1;
/// Highest score the rubric allows; the only score that accepts an answer.
pub const MAX_SCORE: u8 = 5;
/// Scores strictly above this end the run.
pub const ACCEPT_ABOVE: u8 = 4;

/// Score (1–5) plus feedback on the latest answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    pub score: u8,
    pub feedback: String,
}

/// The provider's reply could not be turned into a valid [`Critique`].
#[derive(Debug, Clone, Error)]
#[error("critique reply violates schema: {reason}")]
pub struct SchemaViolation {
    /// What was wrong with the reply
    pub reason: String,
    /// The reply as received
    pub raw: String,
}

/// Wire shape of the structured reply, before range checks.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCritique {
    score: i64,
    feedback: String,
}

impl Critique {
    /// Build a critique, enforcing the score range and the
    /// "feedback may only be empty for a perfect score" rule.
    pub fn new(score: i64, feedback: impl Into<String>) -> Result<Self, String> {
        if !(i64::from(MIN_SCORE)..=i64::from(MAX_SCORE)).contains(&score) {
            return Err(format!("score {score} outside {MIN_SCORE}..={MAX_SCORE}"));
        }
        let feedback = feedback.into();
        let score = score as u8;
        if score < MAX_SCORE && feedback.trim().is_empty() {
            return Err(format!("feedback is required when score is {score}"));
        }
        Ok(Self { score, feedback })
    }

    /// Parse a structured-output reply.
    ///
    /// Accepts the JSON object on its own or wrapped in a single Markdown code
    /// fence, which some local models add even under a JSON constraint.
    pub fn parse(raw: &str) -> Result<Self, SchemaViolation> {
        let violation = |reason: String| SchemaViolation {
            reason,
            raw: raw.to_string(),
        };

        let body = strip_code_fence(raw.trim());
        let parsed: RawCritique =
            serde_json::from_str(body).map_err(|e| violation(e.to_string()))?;
        Self::new(parsed.score, parsed.feedback).map_err(violation)
    }

    /// JSON Schema the critic constrains the provider's reply to.
    pub fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "score": {
                    "type": "integer",
                    "minimum": MIN_SCORE,
                    "maximum": MAX_SCORE,
                    "description": "The quality score of the answer from 1-5"
                },
                "feedback": {
                    "type": "string",
                    "description": "Critique of what is missing or incorrect if score < 5"
                }
            },
            "required": ["score", "feedback"],
            "additionalProperties": false
        })
    }

    /// Whether this verdict ends the run.
    pub fn is_accepted(&self) -> bool {
        self.score > ACCEPT_ABOVE
    }

    /// The conversational turn that lets the next generator pass see the verdict.
    pub fn to_message(&self) -> Message {
        Message::user(format!(
            "[Critique] Score: {}/{MAX_SCORE}. Feedback: {}",
            self.score, self.feedback
        ))
        .with_metadata("author", "critic")
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop an info string such as `json` on the opening fence line.
    match inner.find('\n') {
        Some(newline) => inner[newline + 1..].trim(),
        None => inner.trim(),
    }
}
