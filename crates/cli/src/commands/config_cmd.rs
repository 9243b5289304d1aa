//! `deepcritic config` — Inspect the effective configuration.

use deepcritic_config::AppConfig;

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("# Effective configuration (file + environment)");
    println!("# provider: {}", config.generation_provider());
    println!("# model:    {}", config.generation_model());
    println!("# critic:   {}", config.critic_model());
    println!();
    println!("{}", config.to_redacted_toml());
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
