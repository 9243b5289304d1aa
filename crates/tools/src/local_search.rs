//! Local codebase search over a pre-built embedding index.
//!
//! The index is a JSON array of `{content, source, embedding}` records in
//! `<vector_store_dir>/index.json`. The query is embedded through the
//! configured provider and matched by cosine similarity.

use async_trait::async_trait;
use deepcritic_core::error::ToolError;
use deepcritic_core::provider::{EmbeddingRequest, Provider};
use deepcritic_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

pub const INDEX_FILE: &str = "index.json";
const TOP_K: usize = 3;

/// One chunk of the indexed codebase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub content: String,
    pub source: String,
    pub embedding: Vec<f32>,
}

/// A search hit as returned to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub source: String,
}

pub struct LocalSearchTool {
    store_dir: PathBuf,
    embedder: Arc<dyn Provider>,
    embedding_model: String,
}

impl LocalSearchTool {
    pub fn new(
        store_dir: impl Into<PathBuf>,
        embedder: Arc<dyn Provider>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            store_dir: store_dir.into(),
            embedder,
            embedding_model: embedding_model.into(),
        }
    }

    async fn load_index(&self) -> Result<Vec<IndexedChunk>, String> {
        if !tokio::fs::try_exists(&self.store_dir).await.unwrap_or(false) {
            return Err(format!(
                "Vector store not found at {}. Build the index first.",
                self.store_dir.display()
            ));
        }

        let path = self.store_dir.join(INDEX_FILE);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        serde_json::from_str(&raw).map_err(|e| format!("malformed index {}: {e}", path.display()))
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, String> {
        let index = self.load_index().await?;

        let response = self
            .embedder
            .embed(EmbeddingRequest {
                model: self.embedding_model.clone(),
                inputs: vec![query.to_string()],
            })
            .await
            .map_err(|e| e.to_string())?;

        let query_embedding = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| "embedding provider returned no vectors".to_string())?;

        debug!(chunks = index.len(), "Ranking local index");
        Ok(rank(&index, &query_embedding, TOP_K))
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]; 0.0 for mismatched, empty or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// The `limit` chunks most similar to the query, best first.
pub fn rank(index: &[IndexedChunk], query_embedding: &[f32], limit: usize) -> Vec<SearchHit> {
    let mut scored: Vec<(f32, &IndexedChunk)> = index
        .iter()
        .map(|chunk| (cosine_similarity(&chunk.embedding, query_embedding), chunk))
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
        .into_iter()
        .map(|(_, chunk)| SearchHit {
            content: chunk.content.clone(),
            source: chunk.source.clone(),
        })
        .collect()
}

#[async_trait]
impl Tool for LocalSearchTool {
    fn name(&self) -> &str {
        "local_codebase_search"
    }

    fn description(&self) -> &str {
        "Search the local private codebase for code snippets, architecture, or documentation. \
         Use this when the user asks about the project structure or specific files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query for the codebase"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        match self.search(query).await {
            Ok(hits) => {
                let data = serde_json::to_value(&hits).map_err(|e| ToolError::ExecutionFailed {
                    tool_name: self.name().into(),
                    reason: e.to_string(),
                })?;
                Ok(ToolResult {
                    call_id: String::new(),
                    success: true,
                    output: data.to_string(),
                    data: Some(data),
                })
            }
            Err(reason) => {
                warn!(error = %reason, "Local codebase search failed");
                Ok(ToolResult {
                    call_id: String::new(),
                    success: false,
                    output: format!("Error searching codebase: {reason}"),
                    data: None,
                })
            }
        }
    }
}
