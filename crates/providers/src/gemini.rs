//! Google Gemini native provider implementation.
//!
//! Uses the Generative Language API directly rather than an
//! OpenAI-compatible shim.
//!
//! Features:
//! - `x-goog-api-key` header authentication
//! - System prompt as a top-level `systemInstruction`
//! - Native function calling with `functionCall` / `functionResponse` parts
//! - Structured output via `responseMimeType` + `responseSchema`
//! - Streaming via `streamGenerateContent?alt=sse`
//! - Batch embeddings

use crate::http::{build_client, check_status, transport_error};
use crate::sse::SseLineBuffer;
use async_trait::async_trait;
use deepcritic_core::error::ProviderError;
use deepcritic_core::message::{Message, MessageToolCall, Role};
use deepcritic_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const API_VERSION: &str = "v1beta";

/// Schema keywords the Gemini schema dialect rejects.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["additionalProperties", "$schema"];

/// Gemini native generateContent provider.
pub struct GeminiProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create a new Gemini provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "gemini".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: build_client(Duration::from_secs(300)),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/{API_VERSION}/models/{model}:{method}", self.base_url)
    }

    /// Extract system messages from the message list.
    /// Gemini takes the system prompt as `systemInstruction`, not as a turn.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to Gemini `contents`.
    ///
    /// Function responses must name the function they answer, so tool
    /// results are matched to the assistant call that produced them.
    /// Consecutive turns with the same role are merged into one content.
    fn to_api_contents(messages: &[&Message]) -> Vec<Content> {
        let mut call_names: HashMap<&str, &str> = HashMap::new();
        let mut result: Vec<Content> = Vec::new();

        for msg in messages {
            let (role, parts) = match msg.role {
                Role::User => ("user", vec![Part::text(&msg.content)]),
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !msg.content.is_empty() {
                        parts.push(Part::text(&msg.content));
                    }
                    for tc in &msg.tool_calls {
                        call_names.insert(&tc.id, &tc.name);
                        let args = serde_json::from_str(&tc.arguments)
                            .unwrap_or_else(|_| serde_json::json!({}));
                        parts.push(Part {
                            function_call: Some(FunctionCall {
                                name: tc.name.clone(),
                                args,
                            }),
                            ..Part::default()
                        });
                    }
                    if parts.is_empty() {
                        parts.push(Part::text(""));
                    }
                    ("model", parts)
                }
                Role::ToolResult => {
                    let call_id = msg.tool_call_id.as_deref().unwrap_or_default();
                    let name = call_names.get(call_id).copied().unwrap_or(call_id);
                    let part = Part {
                        function_response: Some(FunctionResponse {
                            name: name.to_string(),
                            response: serde_json::json!({ "content": msg.content }),
                        }),
                        ..Part::default()
                    };
                    ("user", vec![part])
                }
                Role::System => continue, // handled separately
            };

            match result.last_mut() {
                Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
                _ => result.push(Content {
                    role: Some(role.to_string()),
                    parts,
                }),
            }
        }

        result
    }

    /// Convert tool definitions to a Gemini `tools` entry.
    fn to_api_tools(tools: &[ToolDefinition]) -> serde_json::Value {
        let declarations: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": sanitize_schema(&t.parameters),
                })
            })
            .collect();
        serde_json::json!([{ "functionDeclarations": declarations }])
    }

    /// Build the `generateContent` body for a request.
    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);

        let mut generation_config = serde_json::json!({
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            generation_config["maxOutputTokens"] = serde_json::json!(max_tokens);
        }
        if let Some(format) = &request.response_format {
            generation_config["responseMimeType"] = serde_json::json!("application/json");
            generation_config["responseSchema"] = sanitize_schema(&format.schema);
        }

        let mut body = serde_json::json!({
            "contents": Self::to_api_contents(&messages),
            "generationConfig": generation_config,
        });

        if let Some(sys) = system {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": sys }] });
        }

        if !request.tools.is_empty() {
            body["tools"] = Self::to_api_tools(&request.tools);
        }

        body
    }

    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(&self.name, response).await
    }

    /// Convert a complete Gemini response to our format.
    fn response_to_provider_response(
        api_resp: GenerateContentResponse,
        requested_model: &str,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let candidate = api_resp.candidates.into_iter().next().ok_or_else(|| {
            let reason = api_resp
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates".into());
            ProviderError::ApiError {
                status_code: 200,
                message: format!("Gemini returned no answer: {reason}"),
            }
        })?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text {
                if !part.thought {
                    content.push_str(&text);
                }
            }
            if let Some(call) = part.function_call {
                tool_calls.push(call.into_tool_call());
            }
        }

        let mut message = Message::assistant(content);
        message.tool_calls = tool_calls;

        let mut metadata = serde_json::Map::new();
        if let Some(reason) = candidate.finish_reason {
            metadata.insert("finish_reason".into(), serde_json::json!(reason));
        }

        Ok(ProviderResponse {
            message,
            usage: api_resp.usage_metadata.map(UsageMetadata::into_usage),
            model: api_resp
                .model_version
                .unwrap_or_else(|| requested_model.to_string()),
            metadata,
        })
    }
}

/// Strip schema keywords Gemini rejects, recursively.
fn sanitize_schema(schema: &serde_json::Value) -> serde_json::Value {
    match schema {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .filter(|(k, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), sanitize_schema(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sanitize_schema).collect())
        }
        other => other.clone(),
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = self.model_url(&request.model, "generateContent");
        let body = Self::request_body(&request);

        debug!(provider = "gemini", model = %request.model, "Sending completion request");

        let response = self.post(&url, &body).await?;

        let api_resp: GenerateContentResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Gemini response: {e}"),
            })?;

        Self::response_to_provider_response(api_resp, &request.model)
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let url = format!(
            "{}?alt=sse",
            self.model_url(&request.model, "streamGenerateContent")
        );
        let body = Self::request_body(&request);

        debug!(provider = "gemini", model = %request.model, "Sending streaming request");

        let response = self.post(&url, &body).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLineBuffer::new();
            let mut tool_calls: Vec<MessageToolCall> = Vec::new();
            let mut usage: Option<Usage> = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for data in lines.push(&bytes) {
                    let event: GenerateContentResponse = match serde_json::from_str(&data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Gemini SSE");
                            continue;
                        }
                    };

                    // Usage is cumulative; the last report wins
                    if let Some(meta) = event.usage_metadata {
                        usage = Some(meta.into_usage());
                    }

                    let parts = event
                        .candidates
                        .into_iter()
                        .next()
                        .and_then(|c| c.content)
                        .map(|c| c.parts)
                        .unwrap_or_default();

                    for part in parts {
                        if let Some(call) = part.function_call {
                            tool_calls.push(call.into_tool_call());
                        }
                        if let Some(text) = part.text.filter(|t| !t.is_empty() && !part.thought) {
                            let chunk = StreamChunk {
                                content: Some(text),
                                tool_calls: Vec::new(),
                                done: false,
                                usage: None,
                            };
                            if tx.send(Ok(chunk)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                    }
                }
            }

            let _ = tx
                .send(Ok(StreamChunk {
                    content: None,
                    tool_calls,
                    done: true,
                    usage,
                }))
                .await;
        });

        Ok(rx)
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        let model = request.model.strip_prefix("models/").unwrap_or(&request.model);
        let url = self.model_url(model, "batchEmbedContents");

        let requests: Vec<serde_json::Value> = request
            .inputs
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": format!("models/{model}"),
                    "content": { "parts": [{ "text": text }] },
                })
            })
            .collect();
        let body = serde_json::json!({ "requests": requests });

        debug!(
            provider = "gemini",
            model = %model,
            count = request.inputs.len(),
            "Sending embedding request"
        );

        let response = self.post(&url, &body).await?;

        let api_resp: BatchEmbedResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Gemini embedding response: {e}"),
            })?;

        Ok(EmbeddingResponse {
            embeddings: api_resp.embeddings.into_iter().map(|e| e.values).collect(),
            model: model.to_string(),
        })
    }
}

// --- Gemini API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    /// Reasoning summaries some models interleave with the answer
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    thought: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

impl FunctionCall {
    /// Gemini does not identify calls, so each one gets a fresh ID.
    fn into_tool_call(self) -> MessageToolCall {
        let arguments = if self.args.is_null() {
            "{}".to_string()
        } else {
            self.args.to_string()
        };
        MessageToolCall {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: self.name,
            arguments,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl UsageMetadata {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_token_count,
            completion_tokens: self.candidates_token_count,
            total_tokens: self.total_token_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}
