//! Durable per-document state: source text, page spans and the active index
//! generation.
//!
//! SQLite is the system of record; an in-memory view of every document is kept
//! alongside it so readers never touch the database. Each document's active
//! generation is an `Arc` swapped under a lock: readers holding the previous
//! generation keep a consistent snapshot while a rebuild commits.
//!
//! Lock order: `docs` before a slot's `state`, and both before `conn`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};

use docqa_core::config::{ChunkingConfig, DistanceMetric};
use docqa_core::db;
use docqa_core::domain::{now_rfc3339, validate_document_id, DocumentRecord, DocumentState};
use docqa_core::error::AppError;
use docqa_core::normalize::{char_len, char_slice, normalize_text};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::index::ExactIndex;
use super::model::{Chunk, ChunkDraft, Citation};
use super::{chunk_id_for, sha256_hex};
use crate::extract::{ExtractedText, PageSpan};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSource {
    pub text: String,
    pub text_sha256: String,
    pub pages: Vec<PageSpan>,
}

/// One committed, immutable snapshot of a document's chunks and vectors.
#[derive(Debug, Clone)]
pub struct Generation {
    pub document_id: String,
    pub generation: u64,
    pub model: String,
    pub metric: DistanceMetric,
    pub chunking: ChunkingConfig,
    pub created_at: String,
    pub chunks: Vec<Chunk>,
    pub index: ExactIndex,
}

impl Generation {
    pub fn chunk(&self, sequence: u32) -> Option<&Chunk> {
        self.chunks.get(sequence as usize).filter(|c| c.sequence == sequence)
    }

    pub fn dims(&self) -> usize {
        self.index.dims()
    }
}

/// Everything an indexing run produced, ready to be committed as a new generation.
#[derive(Debug, Clone)]
pub struct GenerationDraft {
    pub model: String,
    pub metric: DistanceMetric,
    pub chunking: ChunkingConfig,
    pub chunks: Vec<ChunkDraft>,
    pub vectors: Vec<Vec<f32>>,
}

struct SlotState {
    record: DocumentRecord,
    last_generation: u64,
}

struct DocumentSlot {
    document_id: String,
    source: Arc<DocumentSource>,
    state: Mutex<SlotState>,
    active: RwLock<Option<Arc<Generation>>>,
    building: Mutex<bool>,
    build_done: Condvar,
}

impl DocumentSlot {
    fn new(record: DocumentRecord, source: DocumentSource, last_generation: u64) -> Self {
        Self {
            document_id: record.document_id.clone(),
            source: Arc::new(source),
            state: Mutex::new(SlotState {
                record,
                last_generation,
            }),
            active: RwLock::new(None),
            building: Mutex::new(false),
            build_done: Condvar::new(),
        }
    }

    fn record(&self) -> DocumentRecord {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record
            .clone()
    }

    fn active(&self) -> Option<Arc<Generation>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Exclusive right to build a new generation for one document.
///
/// Builds for the same document are serialized: `begin_build` blocks until the
/// previous lease is dropped. Builds for different documents never contend.
pub struct BuildLease {
    slot: Arc<DocumentSlot>,
}

impl BuildLease {
    pub fn document_id(&self) -> &str {
        &self.slot.document_id
    }

    pub fn source(&self) -> Arc<DocumentSource> {
        Arc::clone(&self.slot.source)
    }
}

impl Drop for BuildLease {
    fn drop(&mut self) {
        let mut building = self
            .slot
            .building
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *building = false;
        self.slot.build_done.notify_all();
    }
}

pub struct DocumentStore {
    conn: Mutex<Connection>,
    docs: RwLock<BTreeMap<String, Arc<DocumentSlot>>>,
}

fn not_found(document_id: &str) -> AppError {
    AppError::new("RAG_DOCUMENT_NOT_FOUND", "Document not found")
        .with_details(format!("document_id={document_id}"))
}

/// A lease may outlive its document: `delete` followed by `put` under the same
/// id registers a fresh slot, and the stale lease must not write over it.
fn ensure_current(
    docs: &BTreeMap<String, Arc<DocumentSlot>>,
    slot: &Arc<DocumentSlot>,
) -> Result<(), AppError> {
    match docs.get(&slot.document_id) {
        Some(current) if Arc::ptr_eq(current, slot) => Ok(()),
        _ => Err(AppError::new("RAG_DOCUMENT_NOT_FOUND", "Document not found")
            .with_details(format!(
                "document_id={}; reason=lease_outlived_document",
                slot.document_id
            ))),
    }
}

fn store_err(message: &str, e: rusqlite::Error) -> AppError {
    AppError::new("RAG_STORE_FAILED", message).with_details(e.to_string())
}

fn corrupt(message: &str, details: String) -> AppError {
    AppError::new("RAG_STORE_CORRUPT", message).with_details(details)
}

fn to_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn from_i64(v: i64, what: &str) -> Result<usize, AppError> {
    usize::try_from(v).map_err(|_| corrupt("Negative value in store", format!("{what}={v}")))
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>, AppError> {
    if bytes.len() % 4 != 0 {
        return Err(corrupt(
            "Stored vector has an invalid length",
            format!("bytes={}", bytes.len()),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn check_pages(text: &str, pages: &[PageSpan]) -> Result<(), AppError> {
    let len = char_len(text);
    let mut prev_end = 0usize;
    let mut prev_page = 0u32;
    for p in pages {
        if p.start > p.end || p.end > len || p.start < prev_end || p.page_number <= prev_page {
            return Err(AppError::new(
                "RAG_EXTRACTION_FAILED",
                "Extracted page spans are inconsistent with the text",
            )
            .with_details(format!(
                "page={}; start={}; end={}; text_chars={}",
                p.page_number, p.start, p.end, len
            )));
        }
        prev_end = p.end;
        prev_page = p.page_number;
    }
    Ok(())
}

impl DocumentStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        Self::from_connection(db::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::from_connection(db::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, AppError> {
        db::migrate(&mut conn)?;
        let docs = load_documents(&conn)?;
        debug!(documents = docs.len(), "document store loaded");
        Ok(Self {
            conn: Mutex::new(conn),
            docs: RwLock::new(docs),
        })
    }

    fn slot(&self, document_id: &str) -> Result<Arc<DocumentSlot>, AppError> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .cloned()
            .ok_or_else(|| not_found(document_id))
    }

    /// Store a plain-text document. See [`DocumentStore::put_extracted`].
    pub fn put(&self, document_id: &str, text: &str) -> Result<DocumentRecord, AppError> {
        self.put_extracted(document_id, ExtractedText::plain(text))
    }

    /// Store extracted text as a new `Uploaded` document.
    ///
    /// Re-uploading identical text is a no-op returning the current record;
    /// different text under an existing id is `RAG_STORE_CONFLICT` (delete first).
    pub fn put_extracted(
        &self,
        document_id: &str,
        extracted: ExtractedText,
    ) -> Result<DocumentRecord, AppError> {
        validate_document_id(document_id)?;
        if extracted.text.trim().is_empty() {
            return Err(AppError::new(
                "RAG_EXTRACTION_EMPTY",
                "Document contains no extractable text",
            ));
        }
        if normalize_text(&extracted.text) != extracted.text {
            return Err(AppError::new(
                "RAG_EXTRACTION_FAILED",
                "Extracted text is not normalized",
            ));
        }
        check_pages(&extracted.text, &extracted.pages)?;

        let text_sha256 = sha256_hex(extracted.text.as_bytes());
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = docs.get(document_id) {
            if existing.source.text_sha256 == text_sha256 && existing.source.text == extracted.text {
                return Ok(existing.record());
            }
            return Err(AppError::new(
                "RAG_STORE_CONFLICT",
                "A different document is already stored under this id",
            )
            .with_details(format!("document_id={document_id}")));
        }

        let now = now_rfc3339();
        let record = DocumentRecord {
            document_id: document_id.to_string(),
            state: DocumentState::Uploaded,
            active_generation: None,
            text_chars: char_len(&extracted.text) as u64,
            last_error: None,
            created_at: now.clone(),
            updated_at: now,
        };

        {
            let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            let tx = conn
                .transaction()
                .map_err(|e| store_err("Failed to start transaction", e))?;
            tx.execute(
                "INSERT INTO documents(document_id, text, text_sha256, state, active_generation, last_generation, last_error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, 0, NULL, ?5, ?6)",
                params![
                    record.document_id,
                    extracted.text,
                    text_sha256,
                    record.state.as_str(),
                    record.created_at,
                    record.updated_at
                ],
            )
            .map_err(|e| store_err("Failed to insert document", e))?;
            for p in &extracted.pages {
                tx.execute(
                    "INSERT INTO document_pages(document_id, page_number, start_offset, end_offset) VALUES (?1, ?2, ?3, ?4)",
                    params![document_id, p.page_number, to_i64(p.start), to_i64(p.end)],
                )
                .map_err(|e| store_err("Failed to insert document page", e))?;
            }
            tx.commit()
                .map_err(|e| store_err("Failed to commit document", e))?;
        }

        let source = DocumentSource {
            text: extracted.text,
            text_sha256,
            pages: extracted.pages,
        };
        docs.insert(
            document_id.to_string(),
            Arc::new(DocumentSlot::new(record.clone(), source, 0)),
        );
        info!(document_id, text_chars = record.text_chars, "document stored");
        Ok(record)
    }

    pub fn status(&self, document_id: &str) -> Result<DocumentRecord, AppError> {
        Ok(self.slot(document_id)?.record())
    }

    /// All documents, ordered by id.
    pub fn list(&self) -> Vec<DocumentRecord> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|s| s.record())
            .collect()
    }

    pub fn source(&self, document_id: &str) -> Result<Arc<DocumentSource>, AppError> {
        Ok(Arc::clone(&self.slot(document_id)?.source))
    }

    /// The active generation. Fails with `RAG_RETRIEVAL_NOT_INDEXED` until one is committed.
    pub fn get_index(&self, document_id: &str) -> Result<Arc<Generation>, AppError> {
        self.slot(document_id)?.active().ok_or_else(|| {
            AppError::new(
                "RAG_RETRIEVAL_NOT_INDEXED",
                "Document has no committed index; index it before querying",
            )
            .with_details(format!("document_id={document_id}"))
        })
    }

    pub fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, AppError> {
        Ok(self.get_index(document_id)?.chunks.clone())
    }

    /// Remove the document with its chunks and every generation.
    pub fn delete(&self, document_id: &str) -> Result<(), AppError> {
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        let removed = {
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            conn.execute(
                "DELETE FROM documents WHERE document_id = ?1",
                params![document_id],
            )
            .map_err(|e| store_err("Failed to delete document", e))?
        };
        if docs.remove(document_id).is_none() && removed == 0 {
            return Err(not_found(document_id));
        }
        info!(document_id, "document deleted");
        Ok(())
    }

    pub fn begin_build(&self, document_id: &str) -> Result<BuildLease, AppError> {
        let slot = self.slot(document_id)?;
        {
            let mut building = slot.building.lock().unwrap_or_else(PoisonError::into_inner);
            while *building {
                debug!(document_id, "waiting for in-flight build");
                building = slot
                    .build_done
                    .wait(building)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            *building = true;
        }
        Ok(BuildLease { slot })
    }

    /// Persist a new generation and make it the active one in a single step.
    /// Older generations are dropped from storage; readers already holding them
    /// are unaffected.
    pub fn commit_generation(
        &self,
        lease: &BuildLease,
        draft: GenerationDraft,
    ) -> Result<Arc<Generation>, AppError> {
        let slot = &lease.slot;
        let document_id = slot.document_id.as_str();
        if draft.chunks.len() != draft.vectors.len() {
            return Err(AppError::new(
                "RAG_INDEXING_FAILED",
                "Chunk and vector counts differ",
            )
            .with_details(format!(
                "chunks={}; vectors={}",
                draft.chunks.len(),
                draft.vectors.len()
            )));
        }

        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        ensure_current(&docs, slot)?;
        let mut state = slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = state.last_generation + 1;

        let chunks: Vec<Chunk> = draft
            .chunks
            .into_iter()
            .map(|d| {
                let text_sha256 = sha256_hex(d.text.as_bytes());
                Chunk {
                    chunk_id: chunk_id_for(document_id, generation, d.sequence, &text_sha256),
                    document_id: document_id.to_string(),
                    generation,
                    sequence: d.sequence,
                    start: d.start,
                    end: d.end,
                    page_number: d.page_number,
                    text: d.text,
                    text_sha256,
                }
            })
            .collect();
        let index = ExactIndex::build(
            draft.metric,
            chunks
                .iter()
                .map(|c| c.sequence)
                .zip(draft.vectors.iter().cloned())
                .collect(),
        )?;
        let chunking_json = serde_json::to_string(&draft.chunking).map_err(|e| {
            AppError::new("RAG_STORE_FAILED", "Failed to encode chunking config")
                .with_details(e.to_string())
        })?;
        let now = now_rfc3339();

        {
            let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            let tx = conn
                .transaction()
                .map_err(|e| store_err("Failed to start transaction", e))?;
            let updated = tx
                .execute(
                    "UPDATE documents SET state = ?1, active_generation = ?2, last_generation = ?2, last_error = NULL, updated_at = ?3
                     WHERE document_id = ?4 AND text_sha256 = ?5",
                    params![
                        DocumentState::Indexed.as_str(),
                        generation as i64,
                        now,
                        document_id,
                        slot.source.text_sha256
                    ],
                )
                .map_err(|e| store_err("Failed to update document state", e))?;
            if updated == 0 {
                return Err(not_found(document_id));
            }
            tx.execute(
                "INSERT INTO generations(document_id, generation, model, dims, metric, chunking_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    document_id,
                    generation as i64,
                    draft.model,
                    to_i64(index.dims()),
                    draft.metric.as_str(),
                    chunking_json,
                    now
                ],
            )
            .map_err(|e| store_err("Failed to insert generation", e))?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO chunks(document_id, generation, seq, chunk_id, start_offset, end_offset, page_number, text, text_sha256, vector)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    )
                    .map_err(|e| store_err("Failed to prepare chunk insert", e))?;
                for (c, v) in chunks.iter().zip(draft.vectors.iter()) {
                    stmt.execute(params![
                        document_id,
                        generation as i64,
                        c.sequence,
                        c.chunk_id,
                        to_i64(c.start),
                        to_i64(c.end),
                        c.page_number,
                        c.text,
                        c.text_sha256,
                        encode_vector(v)
                    ])
                    .map_err(|e| store_err("Failed to insert chunk", e))?;
                }
            }
            tx.execute(
                "DELETE FROM generations WHERE document_id = ?1 AND generation < ?2",
                params![document_id, generation as i64],
            )
            .map_err(|e| store_err("Failed to drop superseded generations", e))?;
            tx.commit()
                .map_err(|e| store_err("Failed to commit generation", e))?;
        }

        let committed = Arc::new(Generation {
            document_id: document_id.to_string(),
            generation,
            model: draft.model,
            metric: draft.metric,
            chunking: draft.chunking,
            created_at: now.clone(),
            chunks,
            index,
        });

        *slot.active.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&committed));
        state.last_generation = generation;
        state.record.state = DocumentState::Indexed;
        state.record.active_generation = Some(generation);
        state.record.last_error = None;
        state.record.updated_at = now;
        drop(state);
        drop(docs);

        info!(
            document_id,
            generation,
            chunk_count = committed.chunks.len(),
            "index generation committed"
        );
        Ok(committed)
    }

    /// Record a failed build. A document with a committed generation stays
    /// `Indexed` on it; otherwise it becomes `Failed`.
    pub fn mark_failed(
        &self,
        lease: &BuildLease,
        error: &AppError,
    ) -> Result<DocumentRecord, AppError> {
        let slot = &lease.slot;
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        ensure_current(&docs, slot)?;
        let mut state = slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = if slot.active().is_some() {
            DocumentState::Indexed
        } else {
            DocumentState::Failed
        };
        let message = error.to_string();
        let now = now_rfc3339();

        {
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            let updated = conn
                .execute(
                    "UPDATE documents SET state = ?1, last_error = ?2, updated_at = ?3
                     WHERE document_id = ?4 AND text_sha256 = ?5",
                    params![next.as_str(), message, now, slot.document_id, slot.source.text_sha256],
                )
                .map_err(|e| store_err("Failed to record indexing failure", e))?;
            if updated == 0 {
                return Err(not_found(&slot.document_id));
            }
        }

        state.record.state = next;
        state.record.last_error = Some(message);
        state.record.updated_at = now;
        Ok(state.record.clone())
    }

    /// Check a citation against the active generation and the source text.
    pub fn validate_citation(&self, citation: &Citation) -> Result<(), AppError> {
        let invalid = |reason: &str| {
            AppError::new("RAG_CITATION_INVALID", "Citation does not resolve to stored text")
                .with_details(format!(
                    "document_id={}; generation={}; sequence={}; reason={reason}",
                    citation.document_id, citation.generation, citation.sequence
                ))
        };

        let slot = self.slot(&citation.document_id)?;
        let active = slot.active().ok_or_else(|| invalid("not_indexed"))?;
        if active.generation != citation.generation {
            return Err(invalid("stale_generation"));
        }
        let chunk = active
            .chunk(citation.sequence)
            .ok_or_else(|| invalid("unknown_chunk"))?;
        if chunk.chunk_id != citation.chunk_id {
            return Err(invalid("chunk_id_mismatch"));
        }
        if chunk.start != citation.start
            || chunk.end != citation.end
            || citation.end > char_len(&slot.source.text)
        {
            return Err(invalid("offset_mismatch"));
        }
        if chunk.text_sha256 != citation.text_sha256
            || char_slice(&slot.source.text, citation.start, citation.end) != chunk.text
        {
            return Err(invalid("text_mismatch"));
        }
        Ok(())
    }
}

fn load_documents(conn: &Connection) -> Result<BTreeMap<String, Arc<DocumentSlot>>, AppError> {
    let mut out = BTreeMap::new();

    let mut stmt = conn
        .prepare(
            "SELECT document_id, text, text_sha256, state, active_generation, last_generation, last_error, created_at, updated_at
             FROM documents ORDER BY document_id",
        )
        .map_err(|e| store_err("Failed to query documents", e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })
        .map_err(|e| store_err("Failed to read documents", e))?;

    for r in rows {
        let (
            document_id,
            text,
            text_sha256,
            state,
            active_generation,
            last_generation,
            last_error,
            created_at,
            updated_at,
        ) = r.map_err(|e| store_err("Failed to read document row", e))?;

        let active_generation = active_generation
            .map(|g| from_i64(g, "active_generation").map(|g| g as u64))
            .transpose()?;
        let record = DocumentRecord {
            document_id: document_id.clone(),
            state: DocumentState::parse(&state)?,
            active_generation,
            text_chars: char_len(&text) as u64,
            last_error,
            created_at,
            updated_at,
        };
        let source = DocumentSource {
            pages: load_pages(conn, &document_id)?,
            text,
            text_sha256,
        };
        let slot = DocumentSlot::new(
            record,
            source,
            from_i64(last_generation, "last_generation")? as u64,
        );
        if let Some(g) = active_generation {
            let generation = load_generation(conn, &document_id, g)?;
            *slot.active.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(generation));
        }
        out.insert(document_id, Arc::new(slot));
    }

    Ok(out)
}

fn load_pages(conn: &Connection, document_id: &str) -> Result<Vec<PageSpan>, AppError> {
    let mut stmt = conn
        .prepare(
            "SELECT page_number, start_offset, end_offset FROM document_pages
             WHERE document_id = ?1 ORDER BY page_number",
        )
        .map_err(|e| store_err("Failed to query document pages", e))?;
    let rows = stmt
        .query_map(params![document_id], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        })
        .map_err(|e| store_err("Failed to read document pages", e))?;

    let mut pages = Vec::new();
    for r in rows {
        let (page_number, start, end) = r.map_err(|e| store_err("Failed to read page row", e))?;
        pages.push(PageSpan {
            page_number,
            start: from_i64(start, "start_offset")?,
            end: from_i64(end, "end_offset")?,
        });
    }
    Ok(pages)
}

fn load_generation(
    conn: &Connection,
    document_id: &str,
    generation: u64,
) -> Result<Generation, AppError> {
    let header = conn
        .query_row(
            "SELECT model, dims, metric, chunking_json, created_at FROM generations
             WHERE document_id = ?1 AND generation = ?2",
            params![document_id, generation as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()
        .map_err(|e| store_err("Failed to read generation", e))?;
    let (model, dims, metric, chunking_json, created_at) = header.ok_or_else(|| {
        corrupt(
            "Active generation is missing",
            format!("document_id={document_id}; generation={generation}"),
        )
    })?;
    let metric = DistanceMetric::parse(&metric)
        .map_err(|e| corrupt("Unknown stored metric", e.details.unwrap_or_default()))?;
    let chunking: ChunkingConfig = serde_json::from_str(&chunking_json)
        .map_err(|e| corrupt("Failed to decode stored chunking config", e.to_string()))?;

    let mut stmt = conn
        .prepare(
            "SELECT seq, chunk_id, start_offset, end_offset, page_number, text, text_sha256, vector
             FROM chunks WHERE document_id = ?1 AND generation = ?2 ORDER BY seq",
        )
        .map_err(|e| store_err("Failed to query chunks", e))?;
    let rows = stmt
        .query_map(params![document_id, generation as i64], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<u32>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Vec<u8>>(7)?,
            ))
        })
        .map_err(|e| store_err("Failed to read chunks", e))?;

    let mut chunks = Vec::new();
    let mut entries = Vec::new();
    for r in rows {
        let (sequence, chunk_id, start, end, page_number, text, text_sha256, vector) =
            r.map_err(|e| store_err("Failed to read chunk row", e))?;
        if sequence as usize != chunks.len() {
            return Err(corrupt(
                "Stored chunk sequence has a gap",
                format!("document_id={document_id}; generation={generation}; seq={sequence}"),
            ));
        }
        entries.push((sequence, decode_vector(&vector)?));
        chunks.push(Chunk {
            chunk_id,
            document_id: document_id.to_string(),
            generation,
            sequence,
            start: from_i64(start, "start_offset")?,
            end: from_i64(end, "end_offset")?,
            page_number,
            text,
            text_sha256,
        });
    }

    let index = ExactIndex::build(metric, entries)
        .map_err(|e| corrupt("Stored vectors do not form a valid index", e.to_string()))?;
    if !index.is_empty() && index.dims() as i64 != dims {
        return Err(corrupt(
            "Stored vector dims differ from generation header",
            format!("expected={dims}; got={}", index.dims()),
        ));
    }

    Ok(Generation {
        document_id: document_id.to_string(),
        generation,
        model,
        metric,
        chunking,
        created_at,
        chunks,
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn draft_for(store: &DocumentStore, lease: &BuildLease) -> GenerationDraft {
        let src = store.source(lease.document_id()).expect("source");
        let chunks = crate::document::Chunker::new(ChunkingConfig {
            target_size: 20,
            overlap: 0,
            boundary_window: 5,
            min_chunk_size: 1,
        })
        .expect("chunker")
        .chunk(&src.text, &src.pages);
        let vectors = chunks
            .iter()
            .map(|c| vec![c.sequence as f32 + 1.0, 1.0])
            .collect();
        GenerationDraft {
            model: "test-model".to_string(),
            metric: DistanceMetric::Cosine,
            chunking: ChunkingConfig::default(),
            chunks,
            vectors,
        }
    }

    #[test]
    fn put_is_idempotent_for_same_text_and_conflicts_otherwise() {
        let store = DocumentStore::open_in_memory().expect("open");
        let a = store.put("doc-1", "Hello.  \r\n").expect("put");
        assert_eq!(a.state, DocumentState::Uploaded);
        assert_eq!(a.text_chars, 6);
        let b = store.put("doc-1", "Hello.").expect("put again");
        assert_eq!(a, b);

        let err = store.put("doc-1", "Other.").expect_err("conflict");
        assert_eq!(err.code, "RAG_STORE_CONFLICT");

        let err = store.put("doc-2", " \n ").expect_err("empty");
        assert_eq!(err.code, "RAG_EXTRACTION_EMPTY");
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn unindexed_document_has_no_index() {
        let store = DocumentStore::open_in_memory().expect("open");
        store.put("doc", "Some text.").expect("put");
        assert_eq!(
            store.get_index("doc").expect_err("not indexed").code,
            "RAG_RETRIEVAL_NOT_INDEXED"
        );
        assert_eq!(
            store.get_chunks("missing").expect_err("missing").code,
            "RAG_DOCUMENT_NOT_FOUND"
        );
    }

    #[test]
    fn commit_swaps_generation_and_readers_keep_old_snapshot() {
        let store = DocumentStore::open_in_memory().expect("open");
        store
            .put("doc", "Alpha beta gamma. Delta epsilon zeta. Eta theta.")
            .expect("put");

        let lease = store.begin_build("doc").expect("lease");
        let first = store.commit_generation(&lease, draft_for(&store, &lease)).expect("commit");
        drop(lease);
        assert_eq!(first.generation, 1);
        assert_eq!(first.chunks.len(), 3);

        let held = store.get_index("doc").expect("index");
        let lease = store.begin_build("doc").expect("lease");
        let second = store.commit_generation(&lease, draft_for(&store, &lease)).expect("commit");
        drop(lease);

        assert_eq!(second.generation, 2);
        assert_eq!(held.generation, 1);
        assert_eq!(store.get_index("doc").expect("index").generation, 2);
        assert_ne!(held.chunks[0].chunk_id, second.chunks[0].chunk_id);

        let rec = store.status("doc").expect("status");
        assert_eq!(rec.state, DocumentState::Indexed);
        assert_eq!(rec.active_generation, Some(2));
    }

    #[test]
    fn failure_without_prior_generation_marks_failed() {
        let store = DocumentStore::open_in_memory().expect("open");
        store.put("doc", "Text.").expect("put");
        let lease = store.begin_build("doc").expect("lease");
        let rec = store
            .mark_failed(&lease, &AppError::new("RAG_INDEXING_FAILED", "boom"))
            .expect("mark");
        assert_eq!(rec.state, DocumentState::Failed);
        assert_eq!(rec.last_error.as_deref(), Some("[RAG_INDEXING_FAILED] boom"));
    }

    #[test]
    fn citations_validate_against_active_generation() {
        let store = DocumentStore::open_in_memory().expect("open");
        store
            .put("doc", "Alpha beta gamma. Delta epsilon zeta. Eta theta.")
            .expect("put");
        let lease = store.begin_build("doc").expect("lease");
        let generation = store.commit_generation(&lease, draft_for(&store, &lease)).expect("commit");
        drop(lease);

        let good = Citation::from_chunk(&generation.chunks[1], 40);
        store.validate_citation(&good).expect("valid");

        let mut shifted = good.clone();
        shifted.end += 1;
        assert_eq!(
            store.validate_citation(&shifted).expect_err("bad offsets").code,
            "RAG_CITATION_INVALID"
        );

        let mut stale = good;
        stale.generation = 7;
        assert!(store.validate_citation(&stale).is_err());
    }

    #[test]
    fn delete_removes_document_and_generations() {
        let store = DocumentStore::open_in_memory().expect("open");
        store.put("doc", "Alpha beta gamma. Delta.").expect("put");
        let lease = store.begin_build("doc").expect("lease");
        store.commit_generation(&lease, draft_for(&store, &lease)).expect("commit");
        drop(lease);

        store.delete("doc").expect("delete");
        assert_eq!(store.status("doc").expect_err("gone").code, "RAG_DOCUMENT_NOT_FOUND");
        assert_eq!(store.delete("doc").expect_err("gone").code, "RAG_DOCUMENT_NOT_FOUND");

        let conn = store.conn.lock().expect("conn");
        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))
            .expect("count");
        assert_eq!(left, 0);
    }

    #[test]
    fn stale_lease_cannot_write_over_a_replacement_document() {
        let store = DocumentStore::open_in_memory().expect("open");
        store.put("doc", "Old text about sky. More old text here.").expect("put");
        let lease = store.begin_build("doc").expect("lease");
        let draft = draft_for(&store, &lease);

        store.delete("doc").expect("delete");
        store.put("doc", "Brand new text.").expect("put replacement");

        let err = store.commit_generation(&lease, draft).expect_err("stale commit");
        assert_eq!(err.code, "RAG_DOCUMENT_NOT_FOUND");
        let err = store
            .mark_failed(&lease, &AppError::new("RAG_INDEXING_FAILED", "boom"))
            .expect_err("stale failure");
        assert_eq!(err.code, "RAG_DOCUMENT_NOT_FOUND");
        drop(lease);

        let rec = store.status("doc").expect("status");
        assert_eq!(rec.state, DocumentState::Uploaded);
        assert_eq!(rec.active_generation, None);
        assert_eq!(rec.last_error, None);

        let conn = store.conn.lock().expect("conn");
        let (state, active): (String, Option<i64>) = conn
            .query_row(
                "SELECT state, active_generation FROM documents WHERE document_id = 'doc'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .expect("row");
        assert_eq!(state, DocumentState::Uploaded.as_str());
        assert_eq!(active, None);
        let chunks: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))
            .expect("count");
        assert_eq!(chunks, 0);
    }

    #[test]
    fn page_spans_must_fit_the_text() {
        let store = DocumentStore::open_in_memory().expect("open");
        let err = store
            .put_extracted(
                "doc",
                ExtractedText {
                    text: "short".to_string(),
                    pages: vec![PageSpan { page_number: 1, start: 0, end: 99 }],
                },
            )
            .expect_err("bad pages");
        assert_eq!(err.code, "RAG_EXTRACTION_FAILED");
    }
}
