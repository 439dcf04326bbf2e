use std::sync::Arc;

use docqa_core::config::{RagConfig, RetrievalConfig};
use docqa_core::domain::DocumentRecord;
use docqa_core::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::answer::{GroundedAnswer, GroundedAnswerer};
use crate::document::DocumentStore;
use crate::embeddings::Embedder;
use crate::extract::extractor_for_content_type;
use crate::indexing::{CancellationToken, IndexReport, Indexer};
use crate::llm::Llm;
use crate::retrieve::{RetrievalResult, Retriever};
use crate::runtime::{EMBEDDER, GENERATOR};

/// Answer plus the evidence it was checked against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AskResponse {
    pub answer: GroundedAnswer,
    pub retrieval: RetrievalResult,
}

/// Upload, index and question one document at a time.
pub struct DocumentQa {
    store: Arc<DocumentStore>,
    indexer: Indexer,
    retriever: Retriever,
    answerer: GroundedAnswerer,
    retrieval: RetrievalConfig,
}

impl DocumentQa {
    pub fn new(
        store: Arc<DocumentStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn Llm>,
        config: &RagConfig,
    ) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            indexer: Indexer::new(Arc::clone(&store), Arc::clone(&embedder), config)?,
            retriever: Retriever::new(Arc::clone(&store), embedder, config),
            answerer: GroundedAnswerer::new(llm, &config.generation),
            retrieval: config.retrieval.clone(),
            store,
        })
    }

    /// Use the collaborators installed in the process runtime.
    pub fn from_runtime(store: Arc<DocumentStore>, config: &RagConfig) -> Result<Self, AppError> {
        Self::new(store, EMBEDDER.get()?, GENERATOR.get()?, config)
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Extract text from uploaded bytes and store it. Nothing is stored when
    /// extraction fails.
    pub fn ingest(
        &self,
        document_id: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<DocumentRecord, AppError> {
        let extracted = extractor_for_content_type(content_type)?.extract(bytes)?;
        info!(
            document_id,
            content_type,
            pages = extracted.pages.len(),
            "document extracted"
        );
        self.store.put_extracted(document_id, extracted)
    }

    pub fn index(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, AppError> {
        self.indexer.index_document(document_id, cancel)
    }

    pub fn retrieve(&self, document_id: &str, question: &str) -> Result<RetrievalResult, AppError> {
        self.retriever.retrieve(
            document_id,
            question,
            self.retrieval.top_k,
            self.retrieval.min_score,
        )
    }

    pub fn ask(&self, document_id: &str, question: &str) -> Result<AskResponse, AppError> {
        let retrieval = self.retrieve(document_id, question)?;
        let answer = self.answerer.answer(document_id, question, &retrieval)?;
        Ok(AskResponse { answer, retrieval })
    }

    pub fn delete(&self, document_id: &str) -> Result<(), AppError> {
        self.store.delete(document_id)
    }
}
