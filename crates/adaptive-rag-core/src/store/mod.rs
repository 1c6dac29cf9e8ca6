//! Vector Index Store abstraction.
//!
//! The [`VectorStore`] trait is the one piece of shared mutable state in the
//! system. Records are keyed by chunk id, which is document-scoped, so
//! concurrent upserts from different ingestions never collide. Backends:
//! [`memory::InMemoryStore`] here, SQLite in the app crate.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, IndexRecord, SparseVector};

/// A chunk returned from dense or sparse search, with its backend score.
///
/// Carries everything fusion and result building need, so no second
/// round-trip to the store is required.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: u32,
    /// Display name of the originating document.
    pub title: String,
    pub text: String,
    /// Cosine similarity (dense) or sparse dot product (sparse).
    pub raw_score: f64,
}

impl ChunkCandidate {
    pub fn from_record(record: &IndexRecord, raw_score: f64) -> Self {
        Self {
            chunk_id: record.chunk.id.clone(),
            document_id: record.chunk.document_id.clone(),
            ordinal: record.chunk.ordinal,
            title: record.title.clone(),
            text: record.chunk.text.clone(),
            raw_score,
        }
    }
}

/// Abstract Vector Index Store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace records by id |
/// | [`upsert_document`](VectorStore::upsert_document) | Record a document's metadata |
/// | [`get`](VectorStore::get) | Fetch a record by id |
/// | [`dense_search`](VectorStore::dense_search) | Top-N by cosine similarity |
/// | [`sparse_search`](VectorStore::sparse_search) | Top-N by sparse dot product |
/// | [`clear`](VectorStore::clear) | Remove everything atomically |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records. Either all records in the call are written or none.
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()>;

    /// Insert or replace a document's metadata.
    async fn upsert_document(&self, doc: &Document) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<IndexRecord>>;

    /// Top-`limit` records by cosine similarity to `query`, best first.
    async fn dense_search(&self, query: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>>;

    /// Top-`limit` records with a positive sparse dot product against `query`, best first.
    async fn sparse_search(&self, query: &SparseVector, limit: usize)
        -> Result<Vec<ChunkCandidate>>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize>;

    /// Number of stored documents.
    async fn document_count(&self) -> Result<usize>;

    /// Remove every record and document. Atomic from the caller's perspective.
    async fn clear(&self) -> Result<()>;
}

/// Order candidates by score descending, then ordinal ascending, then id.
pub fn sort_candidates(candidates: &mut [ChunkCandidate]) {
    candidates.sort_by(|a, b| {
        b.raw_score
            .total_cmp(&a.raw_score)
            .then(a.ordinal.cmp(&b.ordinal))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}
