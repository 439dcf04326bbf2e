use serde::{Deserialize, Serialize};
use std::fmt;

/// Single structured error shape used across the pipeline layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

/// Coarse error taxonomy derived from the error code prefix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Extraction,
    Indexing,
    Retrieval,
    Generation,
    Embedding,
    NotFound,
    Storage,
    Other,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        let code = self.code.as_str();
        if code.starts_with("RAG_CONFIG_") {
            ErrorKind::Configuration
        } else if code.starts_with("RAG_EXTRACTION_") {
            ErrorKind::Extraction
        } else if code.starts_with("RAG_INDEXING_") {
            ErrorKind::Indexing
        } else if code.starts_with("RAG_RETRIEVAL_") {
            ErrorKind::Retrieval
        } else if code.starts_with("RAG_GENERATION_") {
            ErrorKind::Generation
        } else if code.starts_with("RAG_EMBEDDINGS_") {
            ErrorKind::Embedding
        } else if code == "RAG_DOCUMENT_NOT_FOUND" {
            ErrorKind::NotFound
        } else if code.starts_with("RAG_STORE_") || code.starts_with("DB_") {
            ErrorKind::Storage
        } else {
            ErrorKind::Other
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
