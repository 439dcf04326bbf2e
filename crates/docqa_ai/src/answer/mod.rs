//! Citation-constrained answer generation.
//!
//! Generated text is treated as untrusted: every reference marker is checked
//! against the excerpts actually placed in the prompt. Markers outside that set
//! are dropped and recorded as grounding violations; a sentence whose every
//! marker was dropped goes with them. A substantive answer left
//! with no valid citation is replaced by the fixed insufficient-information
//! response, so a returned citation always resolves to a retrieved chunk.

use std::collections::BTreeMap;
use std::sync::Arc;

use docqa_core::config::GenerationConfig;
use docqa_core::error::{AppError, ErrorKind};
use docqa_core::normalize::char_len;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::document::Citation;
use crate::guardrails::{
    drop_unsupported_sentences, is_substantive, parse_references, split_segments,
    strip_references, ReferenceToken,
};
use crate::llm::Llm;
use crate::retrieve::{RetrievalResult, RetrievedChunk};

pub mod prompts;

pub const INSUFFICIENT_INFORMATION: &str =
    "There is insufficient information in the document to answer this question.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerSegment {
    pub text: String,
    /// Chunk sequence numbers cited for this segment.
    pub references: Vec<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationReason {
    /// Marker body is not a chunk number.
    Malformed,
    /// Chunk was not retrieved for this question.
    NotRetrieved,
    /// Chunk was retrieved but left out of the prompt by the context budget.
    NotInContext,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroundingViolation {
    pub token: String,
    pub reason: ViolationReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroundedAnswer {
    pub document_id: String,
    pub question: String,
    pub text: String,
    pub citations: Vec<Citation>,
    pub segments: Vec<AnswerSegment>,
    pub insufficient: bool,
    pub violations: Vec<GroundingViolation>,
}

impl GroundedAnswer {
    fn insufficient(
        document_id: &str,
        question: &str,
        violations: Vec<GroundingViolation>,
    ) -> Self {
        Self {
            document_id: document_id.to_string(),
            question: question.to_string(),
            text: INSUFFICIENT_INFORMATION.to_string(),
            citations: Vec::new(),
            segments: Vec::new(),
            insufficient: true,
            violations,
        }
    }
}

pub struct GroundedAnswerer {
    llm: Arc<dyn Llm>,
    max_context_chars: usize,
    snippet_chars: usize,
}

impl GroundedAnswerer {
    pub fn new(llm: Arc<dyn Llm>, config: &GenerationConfig) -> Self {
        Self {
            llm,
            max_context_chars: config.max_context_chars,
            snippet_chars: config.snippet_chars,
        }
    }

    pub fn answer(
        &self,
        document_id: &str,
        question: &str,
        retrieval: &RetrievalResult,
    ) -> Result<GroundedAnswer, AppError> {
        if retrieval.document_id != document_id {
            return Err(AppError::new(
                "RAG_CONFIG_INVALID",
                "Retrieval result belongs to a different document",
            )
            .with_details(format!(
                "document_id={document_id}; retrieval_document_id={}",
                retrieval.document_id
            )));
        }
        if retrieval.is_empty() {
            info!(document_id, "no evidence cleared the relevance floor");
            return Ok(GroundedAnswer::insufficient(document_id, question, Vec::new()));
        }

        let included = self.select_context(&retrieval.hits);
        let blocks = included
            .values()
            .map(|h| prompts::excerpt_block(&h.chunk))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let prompt = prompts::grounded_answer_prompt(question.trim(), &blocks);
        debug!(document_id, excerpts = included.len(), "prompt assembled");

        let raw = self.llm.generate(&prompt).map_err(|e| {
            if e.kind() == ErrorKind::Generation {
                e
            } else {
                AppError::new("RAG_GENERATION_FAILED", "Generation collaborator failed")
                    .with_details(format!("document_id={document_id}; cause={e}"))
                    .with_retryable(e.retryable)
            }
        })?;
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::new(
                "RAG_GENERATION_EMPTY",
                "Generation collaborator returned no text",
            )
            .with_details(format!("document_id={document_id}")));
        }

        let mut violations = Vec::new();
        for token in parse_references(raw) {
            let reason = match token.sequence {
                None => Some(ViolationReason::Malformed),
                Some(s) if included.contains_key(&s) => None,
                Some(s) if retrieval.contains(s) => Some(ViolationReason::NotInContext),
                Some(_) => Some(ViolationReason::NotRetrieved),
            };
            if let Some(reason) = reason {
                warn!(document_id, token = %token.raw, ?reason, "grounding violation: citation dropped");
                violations.push(GroundingViolation {
                    token: token.raw,
                    reason,
                });
            }
        }

        let grounded = |t: &ReferenceToken| t.sequence.is_some_and(|s| included.contains_key(&s));
        let (kept, unsupported) = drop_unsupported_sentences(raw, grounded);
        for sentence in &unsupported {
            warn!(document_id, sentence = %sentence, "sentence dropped: none of its citations are grounded");
        }
        let text = strip_references(&kept, grounded).trim().to_string();
        let mut cited: Vec<u32> = parse_references(&text)
            .into_iter()
            .filter_map(|t| t.sequence)
            .collect();
        cited.sort_unstable();
        cited.dedup();

        if unsupported.is_empty() && !is_substantive(&text) {
            info!(document_id, "model reported insufficient evidence");
            return Ok(GroundedAnswer::insufficient(document_id, question, violations));
        }
        if cited.is_empty() || !is_substantive(&text) {
            warn!(
                document_id,
                violations = violations.len(),
                "substantive answer has no valid citation; downgraded to insufficient information"
            );
            return Ok(GroundedAnswer::insufficient(document_id, question, violations));
        }

        let citations = cited
            .iter()
            .filter_map(|s| included.get(s))
            .map(|h| Citation::from_chunk(&h.chunk, self.snippet_chars))
            .collect();
        let segments = split_segments(&text)
            .into_iter()
            .map(|s| AnswerSegment {
                text: s.text,
                references: s.references,
            })
            .collect();

        Ok(GroundedAnswer {
            document_id: document_id.to_string(),
            question: question.to_string(),
            text,
            citations,
            segments,
            insufficient: false,
            violations,
        })
    }

    /// Hits placed in the prompt, best first until the character budget is spent.
    /// The top hit is always included.
    fn select_context<'a>(&self, hits: &'a [RetrievedChunk]) -> BTreeMap<u32, &'a RetrievedChunk> {
        let mut out = BTreeMap::new();
        let mut used = 0usize;
        for hit in hits {
            let len = char_len(&hit.chunk.text);
            if !out.is_empty() && used + len > self.max_context_chars {
                continue;
            }
            used += len;
            out.insert(hit.chunk.sequence, hit);
        }
        out
    }
}
