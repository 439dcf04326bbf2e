use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::AppError;

/// Lifecycle of an uploaded document.
///
/// `Indexed` is reached only after every chunk has been embedded and the index
/// generation has been committed. A failed build leaves the document `Failed`
/// (or keeps a previously committed generation active).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Uploaded,
    Indexed,
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Uploaded => "uploaded",
            DocumentState::Indexed => "indexed",
            DocumentState::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "uploaded" => Ok(DocumentState::Uploaded),
            "indexed" => Ok(DocumentState::Indexed),
            "failed" => Ok(DocumentState::Failed),
            other => Err(AppError::new("RAG_STORE_CORRUPT", "Unknown document state")
                .with_details(format!("state={other}"))),
        }
    }
}

/// Externally visible status of a stored document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentRecord {
    pub document_id: String,
    pub state: DocumentState,
    pub active_generation: Option<u64>,
    pub text_chars: u64,
    pub last_error: Option<String>,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Document ids are opaque, but they end up in file names and log lines.
pub fn validate_document_id(id: &str) -> Result<(), AppError> {
    if id.trim().is_empty() {
        return Err(AppError::new("RAG_CONFIG_INVALID", "Document id must not be empty"));
    }
    if id.len() > 128 {
        return Err(AppError::new("RAG_CONFIG_INVALID", "Document id is too long")
            .with_details(format!("len={}", id.len())));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(AppError::new(
            "RAG_CONFIG_INVALID",
            "Document id may only contain ASCII letters, digits, '-', '_' and '.'",
        )
        .with_details(format!("id={id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_roundtrips_through_str() {
        for st in [DocumentState::Uploaded, DocumentState::Indexed, DocumentState::Failed] {
            assert_eq!(DocumentState::parse(st.as_str()).expect("parse"), st);
        }
        assert_eq!(
            DocumentState::parse("building").expect_err("unknown").code,
            "RAG_STORE_CORRUPT"
        );
    }

    #[test]
    fn document_ids_are_restricted() {
        assert!(validate_document_id("3f2a-doc_1.v2").is_ok());
        assert!(validate_document_id("").is_err());
        assert!(validate_document_id("../etc/passwd").is_err());
        assert!(validate_document_id("has space").is_err());
        assert!(validate_document_id(&"x".repeat(129)).is_err());
    }

    #[test]
    fn now_is_rfc3339() {
        let now = now_rfc3339();
        assert!(OffsetDateTime::parse(&now, &Rfc3339).is_ok());
    }
}
