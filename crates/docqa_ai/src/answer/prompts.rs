use crate::document::Chunk;

/// Marker the model is told to emit when the excerpts do not answer the question.
pub const INSUFFICIENT_EVIDENCE_MARKER: &str = "INSUFFICIENT_EVIDENCE";

pub fn excerpt_block(chunk: &Chunk) -> String {
    let page = chunk
        .page_number
        .map(|p| format!("page {p}, "))
        .unwrap_or_default();
    format!(
        "[[chunk:{}]] ({page}chars {}-{})\n{}",
        chunk.sequence, chunk.start, chunk.end, chunk.text
    )
}

pub fn grounded_answer_prompt(question: &str, excerpt_blocks: &str) -> String {
    format!(
        r#"You answer questions about a single document using only the excerpts below.

Rules (non-negotiable):
1) Use ONLY the excerpts provided. Do not use outside knowledge and do not invent facts.
2) After every claim, add the marker of each excerpt that supports it, in the form [[chunk:<number>]], exactly as shown on the excerpt header.
3) Only use markers that appear on the excerpts below.
4) If the excerpts do not contain the answer, reply with exactly {INSUFFICIENT_EVIDENCE_MARKER} and nothing else.

Question:
{question}

Excerpts:
{excerpt_blocks}

Output:
- Plain text, a few sentences at most.
- Every sentence that states a fact ends with its supporting marker(s).
"#
    )
}
