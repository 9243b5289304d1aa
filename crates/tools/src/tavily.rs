//! Web search tool backed by the Tavily search API.

use async_trait::async_trait;
use deepcritic_config::ToolsConfig;
use deepcritic_core::error::ToolError;
use deepcritic_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const TOOL_NAME: &str = "tavily_search";

pub struct TavilySearchTool {
    api_key: Option<String>,
    api_url: String,
    max_results: u32,
    client: reqwest::Client,
}

impl TavilySearchTool {
    pub fn new(api_key: Option<String>, api_url: impl Into<String>, max_results: u32) -> Self {
        Self {
            api_key,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            max_results,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ToolsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            ..Self::new(
                config.tavily_api_key.clone(),
                &config.tavily_api_url,
                config.max_results,
            )
        }
    }

    fn failed(reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: TOOL_NAME.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

#[async_trait]
impl Tool for TavilySearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the web for current information. Use this when the user asks for facts or current events."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Self::failed("TAVILY_API_KEY is not set"))?;

        debug!(query, max_results = self.max_results, "Searching the web");

        let response = self
            .client
            .post(format!("{}/search", self.api_url))
            .bearer_auth(api_key)
            .json(&SearchRequest {
                query,
                max_results: self.max_results,
            })
            .send()
            .await
            .map_err(|e| Self::failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::failed(format!("search API returned {status}: {body}")));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| Self::failed(format!("unreadable search response: {e}")))?;

        let results = serde_json::Value::Array(body.results);
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: results.to_string(),
            data: Some(results),
        })
    }
}
