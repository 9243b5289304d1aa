//! # DeepCritic Core
//!
//! Domain types, traits, and error definitions for the DeepCritic research agent.
//! This crate has **no framework dependencies** — it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every capability (generation, tools) is defined as a trait here.
//! Implementations live in their respective crates, so backends are picked
//! from configuration and tests run against scripted stand-ins.

pub mod critique;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use critique::{Critique, SchemaViolation};
pub use error::{ProviderError, ToolError};
pub use message::{Message, MessageLog, MessageToolCall, Role, RunId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ResponseFormat, StreamChunk, ToolDefinition};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
