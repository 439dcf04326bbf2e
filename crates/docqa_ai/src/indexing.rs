//! Chunk, embed and commit one document as a new index generation.
//!
//! A run is all-or-nothing: readers see the previous generation (or none) until
//! the commit succeeds. Cancellation is checked before every embedding batch and
//! again before commit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use docqa_core::config::{DistanceMetric, RagConfig};
use docqa_core::error::AppError;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::document::{BuildLease, Chunker, DocumentStore, GenerationDraft};
use crate::embeddings::Embedder;

/// Shared cancellation flag; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexReport {
    pub document_id: String,
    pub generation: u64,
    pub chunk_count: u32,
    pub dims: u32,
    pub metric: DistanceMetric,
    pub model: String,
    pub elapsed_ms: u64,
}

pub struct Indexer {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    metric: DistanceMetric,
    batch_size: usize,
    pool: ThreadPool,
}

fn cancelled(document_id: &str) -> AppError {
    AppError::new("RAG_INDEXING_CANCELLED", "Indexing was cancelled")
        .with_details(format!("document_id={document_id}"))
}

fn stage_error(document_id: &str, stage: &str, cause: AppError) -> AppError {
    if cause.code == "RAG_INDEXING_CANCELLED" || cause.code == "RAG_DOCUMENT_NOT_FOUND" {
        return cause;
    }
    AppError::new("RAG_INDEXING_FAILED", format!("Indexing failed during {stage}"))
        .with_details(format!(
            "document_id={document_id}; stage={stage}; cause={cause}{}",
            cause
                .details
                .as_deref()
                .map(|d| format!(" ({d})"))
                .unwrap_or_default()
        ))
        .with_retryable(true)
}

impl Indexer {
    pub fn new(
        store: Arc<DocumentStore>,
        embedder: Arc<dyn Embedder>,
        config: &RagConfig,
    ) -> Result<Self, AppError> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.embedding.max_parallel_batches)
            .thread_name(|i| format!("docqa-embed-{i}"))
            .build()
            .map_err(|e| {
                AppError::new("RAG_CONFIG_INVALID", "Failed to build embedding thread pool")
                    .with_details(e.to_string())
            })?;
        Ok(Self {
            store,
            embedder,
            chunker: Chunker::new(config.chunking.clone())?,
            metric: config.index.metric,
            batch_size: config.embedding.batch_size,
            pool,
        })
    }

    /// Build and commit a new generation. Blocks while another build of the same
    /// document is running.
    pub fn index_document(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, AppError> {
        let started = Instant::now();
        let lease = self.store.begin_build(document_id)?;
        info!(document_id, model = self.embedder.model(), "indexing started");

        match self.build(&lease, cancel, started) {
            Ok(report) => {
                info!(
                    document_id,
                    generation = report.generation,
                    chunk_count = report.chunk_count,
                    elapsed_ms = report.elapsed_ms,
                    "indexing finished"
                );
                Ok(report)
            }
            Err(err) if err.code == "RAG_INDEXING_CANCELLED" => {
                info!(document_id, "indexing cancelled");
                Err(err)
            }
            Err(err) => {
                warn!(document_id, code = %err.code, details = ?err.details, "indexing failed");
                if let Err(mark_err) = self.store.mark_failed(&lease, &err) {
                    warn!(document_id, code = %mark_err.code, "could not record indexing failure");
                }
                Err(err)
            }
        }
    }

    fn build(
        &self,
        lease: &BuildLease,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<IndexReport, AppError> {
        let document_id = lease.document_id();
        let source = lease.source();

        let chunks = self.chunker.chunk(&source.text, &source.pages);
        let embedded = self.pool.install(|| {
            chunks
                .par_chunks(self.batch_size)
                .map(|batch| {
                    if cancel.is_cancelled() {
                        return Err(cancelled(document_id));
                    }
                    let inputs: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
                    let vectors = self
                        .embedder
                        .embed_batch(&inputs)
                        .map_err(|e| stage_error(document_id, "embedding", e))?;
                    if vectors.len() != inputs.len() {
                        return Err(stage_error(
                            document_id,
                            "embedding",
                            AppError::new(
                                "RAG_EMBEDDINGS_FAILED",
                                "Embedder returned a different number of vectors",
                            )
                            .with_details(format!(
                                "expected={}; got={}",
                                inputs.len(),
                                vectors.len()
                            )),
                        ));
                    }
                    Ok(vectors)
                })
                .collect::<Result<Vec<_>, AppError>>()
        })?;
        let vectors: Vec<Vec<f32>> = embedded.into_iter().flatten().collect();

        if cancel.is_cancelled() {
            return Err(cancelled(document_id));
        }

        let chunk_count = chunks.len() as u32;
        let committed = self
            .store
            .commit_generation(
                lease,
                GenerationDraft {
                    model: self.embedder.model().to_string(),
                    metric: self.metric,
                    chunking: self.chunker.config().clone(),
                    chunks,
                    vectors,
                },
            )
            .map_err(|e| stage_error(document_id, "commit", e))?;

        Ok(IndexReport {
            document_id: document_id.to_string(),
            generation: committed.generation,
            chunk_count,
            dims: committed.dims() as u32,
            metric: committed.metric,
            model: committed.model.clone(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}
