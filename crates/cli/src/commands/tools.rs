//! `deepcritic tools` — List the tools a run is given.

use deepcritic_config::AppConfig;
use deepcritic_core::tool::ToolRegistry;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let (_, tools) = super::build_orchestrator(&config)?;

    println!("🔧 Tools ({:?} search mode)", config.search_mode());
    println!();
    for line in describe(&tools) {
        println!("  {line}");
    }
    Ok(())
}

/// One line per tool, sorted by name.
fn describe(tools: &ToolRegistry) -> Vec<String> {
    let mut definitions = tools.definitions();
    definitions.sort_by(|a, b| a.name.cmp(&b.name));
    definitions
        .iter()
        .map(|d| format!("{:<24} {}", d.name, d.description))
        .collect()
}
