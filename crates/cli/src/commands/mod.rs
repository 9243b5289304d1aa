pub mod ask;
pub mod config_cmd;
pub mod tools;

use deepcritic_agent::Orchestrator;
use deepcritic_config::{AppConfig, SearchMode};
use deepcritic_core::tool::ToolRegistry;
use std::sync::Arc;

/// Load the config, failing early when a hosted provider has no key.
pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.use_local && !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured for '{}'!", config.generation_provider());
        eprintln!();
        eprintln!("  Set one of these environment variables (or put it in .env):");
        eprintln!("    GOOGLE_API_KEY=...        (Gemini)");
        eprintln!("    DEEPCRITIC_API_KEY=...    (any hosted provider)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        eprintln!("  To run fully offline against Ollama instead: DEEPCRITIC_USE_LOCAL=true");
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    if config.search_mode() == SearchMode::Web && config.tools.tavily_api_key.is_none() {
        tracing::warn!("TAVILY_API_KEY is not set; web searches will report an error to the model");
    }

    Ok(config)
}

/// Wire provider, tools and orchestrator together from `config`.
pub fn build_orchestrator(config: &AppConfig) -> Result<(Orchestrator, Arc<ToolRegistry>), Box<dyn std::error::Error>> {
    let router = deepcritic_providers::build_from_config(config);
    let provider = router
        .default()
        .ok_or_else(|| format!("Provider '{}' is not configured", router.default_name()))?;

    let tools = Arc::new(deepcritic_tools::registry_from_config(config, provider.clone()));
    let orchestrator = Orchestrator::from_config(config, provider, tools.clone());
    Ok((orchestrator, tools))
}
