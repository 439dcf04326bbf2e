use docqa_core::normalize::snippet_first_chars;
use serde::{Deserialize, Serialize};

/// Chunker output: a span of the normalized text, not yet embedded or identified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkDraft {
    pub sequence: u32,
    /// Character offsets, half-open.
    pub start: usize,
    pub end: usize,
    pub page_number: Option<u32>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub generation: u64,
    pub sequence: u32,
    pub start: usize,
    pub end: usize,
    pub page_number: Option<u32>,
    pub text: String,
    pub text_sha256: String,
}

/// Reference to exactly one stored chunk. Carries a snippet for display, never
/// generated text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    pub generation: u64,
    pub sequence: u32,
    pub start: usize,
    pub end: usize,
    pub page_number: Option<u32>,
    pub text_sha256: String,
    pub snippet: String,
}

impl Citation {
    pub fn from_chunk(chunk: &Chunk, snippet_chars: usize) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            document_id: chunk.document_id.clone(),
            generation: chunk.generation,
            sequence: chunk.sequence,
            start: chunk.start,
            end: chunk.end,
            page_number: chunk.page_number,
            text_sha256: chunk.text_sha256.clone(),
            snippet: snippet_first_chars(&chunk.text, snippet_chars),
        }
    }
}
