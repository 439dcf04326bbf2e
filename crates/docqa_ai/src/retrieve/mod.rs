use std::sync::Arc;

use docqa_core::config::{DistanceMetric, RagConfig};
use docqa_core::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::index::{relevance, Neighbor};
use crate::document::{Chunk, DocumentStore, Generation};
use crate::embeddings::Embedder;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Relevance in the floor's space; higher is better.
    pub score: f32,
    pub distance: f32,
}

/// Ranked evidence for one query, best first. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub document_id: String,
    pub generation: u64,
    pub query: String,
    pub k: usize,
    pub min_score: f32,
    pub hits: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.hits.iter().any(|h| h.chunk.sequence == sequence)
    }
}

pub struct Retriever {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
    metric: DistanceMetric,
    max_k: usize,
}

impl Retriever {
    pub fn new(store: Arc<DocumentStore>, embedder: Arc<dyn Embedder>, config: &RagConfig) -> Self {
        Self {
            store,
            embedder,
            metric: config.index.metric,
            max_k: config.retrieval.max_k,
        }
    }

    /// Embed `query`, search the document's active generation and keep the
    /// candidates whose relevance is at least `min_score`.
    ///
    /// An empty result is a normal outcome: the document holds no usable evidence.
    ///
    /// `k` is capped at `retrieval.max_k`; the cap applied is reported in
    /// [`RetrievalResult::k`]. A `k` above the chunk count returns every chunk
    /// that clears the floor.
    pub fn retrieve(
        &self,
        document_id: &str,
        query: &str,
        k: usize,
        min_score: f32,
    ) -> Result<RetrievalResult, AppError> {
        let q = query.trim();
        if q.is_empty() {
            return Err(AppError::new(
                "RAG_RETRIEVAL_QUERY_EMPTY",
                "Query must not be empty",
            ));
        }
        if k == 0 || !min_score.is_finite() {
            return Err(AppError::new(
                "RAG_CONFIG_INVALID",
                "k must be positive and min_score finite",
            )
            .with_details(format!("k={k}; min_score={min_score}")));
        }
        let k = k.min(self.max_k);

        let generation = self.store.get_index(document_id)?;
        if generation.model != self.embedder.model() {
            return Err(AppError::new(
                "RAG_RETRIEVAL_MODEL_MISMATCH",
                "Index was built with a different embedding model; re-index the document",
            )
            .with_details(format!(
                "index_model={}; query_model={}",
                generation.model,
                self.embedder.model()
            )));
        }

        let qv = self.embedder.embed(q).map_err(|e| {
            AppError::new(
                "RAG_RETRIEVAL_EMBEDDINGS_FAILED",
                "Failed to embed query",
            )
            .with_details(format!("document_id={document_id}; cause={e}"))
            .with_retryable(e.retryable)
        })?;

        let neighbors = generation.index.search(self.metric, &qv, k)?;
        let hits = resolve_hits(&generation, neighbors, min_score)?;

        debug!(
            document_id,
            generation = generation.generation,
            k,
            hits = hits.len(),
            "retrieval finished"
        );

        Ok(RetrievalResult {
            document_id: document_id.to_string(),
            generation: generation.generation,
            query: q.to_string(),
            k,
            min_score,
            hits,
        })
    }
}

/// Map index neighbors back to chunks, dropping those below the floor.
///
/// Every index key names a chunk of the same generation; a key without one
/// means the generation is corrupt and fails the query.
fn resolve_hits(
    generation: &Generation,
    neighbors: Vec<Neighbor>,
    min_score: f32,
) -> Result<Vec<RetrievedChunk>, AppError> {
    let mut hits = Vec::with_capacity(neighbors.len());
    for n in neighbors {
        let score = relevance(generation.metric, n.distance);
        if score < min_score {
            continue;
        }
        let chunk = generation.chunk(n.key).ok_or_else(|| {
            AppError::new("RAG_RETRIEVAL_FAILED", "Index entry has no matching chunk")
                .with_details(format!(
                    "document_id={}; generation={}; sequence={}",
                    generation.document_id, generation.generation, n.key
                ))
        })?;
        hits.push(RetrievedChunk {
            chunk: chunk.clone(),
            score,
            distance: n.distance,
        });
    }
    Ok(hits)
}
