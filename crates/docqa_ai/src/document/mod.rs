pub mod chunking;
pub mod index;
pub mod model;
pub mod similarity;
pub mod store;

pub use chunking::Chunker;
pub use index::{ExactIndex, Neighbor};
pub use model::{Chunk, ChunkDraft, Citation};
pub use store::{BuildLease, DocumentSource, DocumentStore, Generation, GenerationDraft};

use sha2::{Digest, Sha256};

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Stable external identity of a chunk within one index generation.
pub(crate) fn chunk_id_for(
    document_id: &str,
    generation: u64,
    sequence: u32,
    text_sha256: &str,
) -> String {
    let id_input = format!("v1|{document_id}|{generation}|{sequence}|{text_sha256}");
    sha256_hex(id_input.as_bytes())
}
