use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::vault::normalize_note_path;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use opendal::Operator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

pub const DEFAULT_TOP_K: usize = 10;

/// One precomputed embedding.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub path: String,
    pub vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SearchOptions {
    pub top_k: usize,
    pub min_score: Option<f32>,
    pub exclude_path: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_score: None,
            exclude_path: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SimilarityHit {
    pub path: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Pluggable text embedding backend.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>>;
}

/// Providers available to the engine, in registration order.
#[derive(Default, Clone)]
pub struct EmbedderRegistry {
    providers: Vec<Arc<dyn Embedder>>,
}

impl EmbedderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering a name twice replaces the earlier provider in place.
    pub fn register(&mut self, embedder: Arc<dyn Embedder>) {
        match self
            .providers
            .iter_mut()
            .find(|p| p.name() == embedder.name())
        {
            Some(slot) => *slot = embedder,
            None => self.providers.push(embedder),
        }
    }

    /// Preferred provider if registered, else the first one.
    pub fn select(&self, preferred: Option<&str>) -> EngineResult<Arc<dyn Embedder>> {
        if let Some(name) = preferred {
            if let Some(provider) = self.providers.iter().find(|p| p.name() == name) {
                return Ok(provider.clone());
            }
            tracing::warn!(provider = name, "preferred embedding provider not registered");
        }
        self.providers
            .first()
            .cloned()
            .ok_or_else(|| EngineError::NotFound("embedding provider".to_string()))
    }
}

fn vector_from(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn record_from_entry(entry: &Value) -> Option<VectorRecord> {
    let path = entry.get("path").and_then(|v| v.as_str())?;
    let vector = entry
        .get("vector")
        .or_else(|| entry.get("embedding"))
        .and_then(vector_from)?;
    Some(VectorRecord {
        path: normalize_note_path(path),
        vector,
        text: entry
            .get("text")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    })
}

/// Decodes `[{path, vector|embedding}]` or `{path: [..]}`.
pub fn parse_vector_records(document: &Value) -> Vec<VectorRecord> {
    let mut records = Vec::new();
    match document {
        Value::Array(entries) => {
            for entry in entries {
                match record_from_entry(entry) {
                    Some(record) => records.push(record),
                    None => tracing::warn!(entry = %entry, "skipping malformed vector record"),
                }
            }
        }
        Value::Object(map) => {
            for (path, value) in map {
                match vector_from(value) {
                    Some(vector) => records.push(VectorRecord {
                        path: normalize_note_path(path),
                        vector,
                        text: None,
                    }),
                    None => tracing::warn!(path = %path, "skipping malformed vector record"),
                }
            }
        }
        other => tracing::warn!(kind = ?other, "vector document is neither a list nor a mapping"),
    }
    records
}

pub async fn load_vector_records(op: &Operator, path: &str) -> EngineResult<Vec<VectorRecord>> {
    if !op.exists(path).await.context("failed to check vector file")? {
        return Err(EngineError::NotFound(format!("vector file {}", path)));
    }
    let bytes = op.read(path).await.context("failed to read vector file")?;
    let document: Value = serde_json::from_slice(&bytes.to_vec())
        .map_err(|e| EngineError::Validation(format!("vector file is not valid JSON: {}", e)))?;
    let records = parse_vector_records(&document);
    tracing::debug!(path, records = records.len(), "vector records loaded");
    Ok(records)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Brute-force cosine scan. Highest score first, ties by path.
pub fn search(records: &[VectorRecord], query: &[f32], options: &SearchOptions) -> Vec<SimilarityHit> {
    let exclude = options.exclude_path.as_deref().map(normalize_note_path);
    let mut hits: Vec<SimilarityHit> = records
        .iter()
        .filter(|r| exclude.as_deref() != Some(r.path.as_str()))
        .filter_map(|r| {
            let score = cosine_similarity(&r.vector, query)?;
            if options.min_score.is_some_and(|min| score < min) {
                return None;
            }
            Some(SimilarityHit {
                path: r.path.clone(),
                score,
                text: r.text.clone(),
            })
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    hits.truncate(options.top_k);
    hits
}

/// Embeds `text` with the configured provider and ranks `records` against it.
pub async fn search_by_text(
    registry: &EmbedderRegistry,
    config: &EngineConfig,
    records: &[VectorRecord],
    text: &str,
    options: &SearchOptions,
) -> EngineResult<Vec<SimilarityHit>> {
    if text.trim().is_empty() {
        return Err(EngineError::Validation("query text must not be empty".to_string()));
    }
    let embedder = registry.select(config.embedding_provider.as_deref())?;
    let query = embedder
        .embed(text)
        .await
        .with_context(|| format!("embedding provider {} failed", embedder.name()))?;
    tracing::debug!(provider = embedder.name(), dims = query.len(), "query embedded");
    Ok(search(records, &query, options))
}

/// Neighbours of a note's own vector; the note itself is never returned.
pub fn search_by_note(
    records: &[VectorRecord],
    path: &str,
    options: &SearchOptions,
) -> EngineResult<Vec<SimilarityHit>> {
    let path = normalize_note_path(path);
    let record = records
        .iter()
        .find(|r| r.path == path)
        .ok_or_else(|| EngineError::NotFound(format!("vector for {}", path)))?;
    let options = SearchOptions {
        exclude_path: Some(path.clone()),
        ..options.clone()
    };
    Ok(search(records, &record.vector, &options))
}
