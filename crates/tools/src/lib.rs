//! Search tools for DeepCritic.
//!
//! Tools give the agent information the model does not have: current
//! facts from the web, or snippets from a local private codebase.
//! Which one a run gets depends on whether it runs in local mode.

pub mod local_search;
pub mod tavily;

use deepcritic_config::{AppConfig, SearchMode};
use deepcritic_core::provider::Provider;
use deepcritic_core::tool::ToolRegistry;
use std::sync::Arc;

pub use local_search::LocalSearchTool;
pub use tavily::TavilySearchTool;

/// Create the tool registry for a run.
///
/// Local mode gets only `local_codebase_search`, embedding queries through
/// `embedder`; otherwise only `tavily_search` is registered.
pub fn registry_from_config(config: &AppConfig, embedder: Arc<dyn Provider>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    match config.search_mode() {
        SearchMode::Local => registry.register(Box::new(LocalSearchTool::new(
            &config.tools.vector_store_dir,
            embedder,
            &config.local.embedding_model,
        ))),
        SearchMode::Web => registry.register(Box::new(TavilySearchTool::from_config(&config.tools))),
    }
    registry
}
