//! Provider router — selects the generation backend based on config.
//!
//! Handles provider creation and lookup by name. The default entry is the
//! backend the current mode (hosted or local) generates with.

use crate::gemini::GeminiProvider;
use crate::openai_compat::OpenAiCompatProvider;
use deepcritic_config::AppConfig;
use deepcritic_core::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Name of the default provider.
    pub fn default_name(&self) -> &str {
        &self.default_provider
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
///
/// Every `[providers.*]` table becomes an entry; the provider the current
/// mode generates with is always present, configured or not.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let default_name = config.generation_provider().to_string();
    let mut router = ProviderRouter::new(&default_name);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let provider = build_provider(config, name, &api_key, provider_config.api_url.as_deref());
        router.register(name.clone(), provider);
    }

    if router.get(&default_name).is_none() {
        let api_key = config.api_key.clone().unwrap_or_default();
        let provider = build_provider(config, &default_name, &api_key, None);
        router.register(default_name, provider);
    }

    router
}

fn build_provider(
    config: &AppConfig,
    name: &str,
    api_key: &str,
    api_url: Option<&str>,
) -> Arc<dyn Provider> {
    match name {
        "gemini" | "google" => {
            let mut p = GeminiProvider::new(api_key);
            if let Some(url) = api_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        }
        "ollama" => Arc::new(OpenAiCompatProvider::ollama(
            api_url.unwrap_or(&config.local.base_url),
        )),
        _ => {
            let base_url = api_url
                .map(str::to_string)
                .unwrap_or_else(|| default_base_url(name));
            Arc::new(OpenAiCompatProvider::new(name, base_url, api_key))
        }
    }
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "gemini" | "google" => crate::gemini::DEFAULT_BASE_URL.into(),
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
