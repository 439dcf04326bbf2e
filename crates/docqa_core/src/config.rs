//! Pipeline configuration.
//!
//! Every field has a default so a partial JSON document is a valid config.
//! Call [`RagConfig::validate`] before handing the config to any component.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// Sliding-window chunking parameters, all in characters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub target_size: usize,
    pub overlap: usize,
    /// How far a window edge may move to land on a sentence or paragraph boundary.
    pub boundary_window: usize,
    /// A trailing remainder shorter than this is merged into the previous chunk.
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: 1200,
            overlap: 200,
            boundary_window: 120,
            min_chunk_size: 30,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.target_size == 0 {
            return Err(AppError::new(
                "RAG_CONFIG_INVALID",
                "chunking.target_size must be greater than 0",
            ));
        }
        if self.overlap >= self.target_size {
            return Err(AppError::new(
                "RAG_CONFIG_INVALID",
                "chunking.overlap must be smaller than chunking.target_size",
            )
            .with_details(format!(
                "overlap={}; target_size={}",
                self.overlap, self.target_size
            )));
        }
        if self.min_chunk_size > self.target_size {
            return Err(AppError::new(
                "RAG_CONFIG_INVALID",
                "chunking.min_chunk_size must not exceed chunking.target_size",
            )
            .with_details(format!(
                "min_chunk_size={}; target_size={}",
                self.min_chunk_size, self.target_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TruncationPolicy {
    /// Keep the first `max_input_chars` characters.
    Truncate,
    /// Fail with `RAG_EMBEDDINGS_INPUT_TOO_LONG`.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub max_input_chars: usize,
    pub truncation: TruncationPolicy,
    pub batch_size: usize,
    pub max_parallel_batches: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            max_input_chars: 8000,
            truncation: TruncationPolicy::Truncate,
            batch_size: 16,
            max_parallel_batches: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    SquaredEuclidean,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::SquaredEuclidean => "squared_euclidean",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "cosine" => Ok(DistanceMetric::Cosine),
            "squared_euclidean" => Ok(DistanceMetric::SquaredEuclidean),
            other => Err(AppError::new("RAG_CONFIG_INVALID", "Unknown distance metric")
                .with_details(format!("metric={other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct IndexConfig {
    pub metric: DistanceMetric,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Absolute relevance floor in the metric's relevance space.
    pub min_score: f32,
    pub max_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.30,
            max_k: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    /// Upper bound on the excerpt text placed in a single prompt.
    pub max_context_chars: usize,
    pub snippet_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1".to_string(),
            max_context_chars: 12_000,
            snippet_chars: 280,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub allow_remote: bool,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            allow_remote: false,
            timeout_secs: 30,
        }
    }
}

impl RagConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw).map_err(|e| {
            AppError::new("RAG_CONFIG_INVALID", "Failed to decode configuration")
                .with_details(e.to_string())
        })
    }

    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::new("RAG_CONFIG_INVALID", "Failed to read configuration file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Overlay `DOCQA_*` environment variables on top of the loaded values.
    pub fn apply_env_overrides(&mut self) -> Result<(), AppError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DOCQA_OLLAMA_URL") {
            self.ollama.base_url = v;
        }
        if let Some(v) = lookup("DOCQA_EMBED_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("DOCQA_LLM_MODEL") {
            self.generation.model = v;
        }
        if let Some(v) = lookup("DOCQA_TOP_K") {
            self.retrieval.top_k = v.trim().parse().map_err(|_| {
                AppError::new("RAG_CONFIG_INVALID", "DOCQA_TOP_K must be an integer")
                    .with_details(format!("value={v}"))
            })?;
        }
        if let Some(v) = lookup("DOCQA_MIN_SCORE") {
            self.retrieval.min_score = v.trim().parse().map_err(|_| {
                AppError::new("RAG_CONFIG_INVALID", "DOCQA_MIN_SCORE must be a number")
                    .with_details(format!("value={v}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.chunking.validate()?;

        if self.embedding.model.trim().is_empty() {
            return Err(AppError::new("RAG_CONFIG_INVALID", "embedding.model is required"));
        }
        if self.embedding.max_input_chars == 0 {
            return Err(AppError::new(
                "RAG_CONFIG_INVALID",
                "embedding.max_input_chars must be greater than 0",
            ));
        }
        if self.embedding.batch_size == 0 || self.embedding.max_parallel_batches == 0 {
            return Err(AppError::new(
                "RAG_CONFIG_INVALID",
                "embedding.batch_size and embedding.max_parallel_batches must be greater than 0",
            ));
        }

        if self.retrieval.top_k == 0 || self.retrieval.max_k == 0 {
            return Err(AppError::new(
                "RAG_CONFIG_INVALID",
                "retrieval.top_k and retrieval.max_k must be greater than 0",
            ));
        }
        if !self.retrieval.min_score.is_finite() {
            return Err(AppError::new(
                "RAG_CONFIG_INVALID",
                "retrieval.min_score must be a finite number",
            ));
        }

        if self.generation.model.trim().is_empty() {
            return Err(AppError::new("RAG_CONFIG_INVALID", "generation.model is required"));
        }
        if self.generation.max_context_chars == 0 {
            return Err(AppError::new(
                "RAG_CONFIG_INVALID",
                "generation.max_context_chars must be greater than 0",
            ));
        }

        if self.ollama.timeout_secs == 0 {
            return Err(AppError::new(
                "RAG_CONFIG_INVALID",
                "ollama.timeout_secs must be greater than 0",
            ));
        }
        Ok(())
    }
}
