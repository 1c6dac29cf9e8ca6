//! Core data models shared by ingestion, retrieval and routing.
//!
//! Everything here is plain data: documents and their chunks, the
//! encodings derived from a chunk, the persisted [`IndexRecord`], the
//! per-session [`ConversationTurn`] and the per-query [`RetrievalResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Term → weight mapping produced by a sparse (keyword) encoder.
///
/// A `BTreeMap` keeps iteration order stable, which keeps scoring and
/// serialization deterministic.
pub type SparseVector = BTreeMap<String, f32>;

/// An uploaded document, created once its ingestion committed at least one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub original_name: String,
    pub uploaded_at: DateTime<Utc>,
    pub byte_size: u64,
    pub mime_type: String,
}

/// A bounded slice of a document's normalized text, the unit of indexing.
///
/// `char_start` / `char_end` are half-open character (Unicode scalar)
/// offsets into the normalized text; `text` is exactly that slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub ordinal: u32,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
}

/// Dense and sparse encodings of one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: String,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
}

/// The persisted unit of the vector index: chunk + encodings + display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub chunk: Chunk,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    /// Display name of the originating document.
    pub title: String,
}

impl IndexRecord {
    pub fn new(chunk: Chunk, embedding: Embedding, title: impl Into<String>) -> Self {
        Self {
            chunk,
            dense: embedding.dense,
            sparse: embedding.sparse,
            title: title.into(),
        }
    }

    /// Record key. Chunk ids are document-scoped, so concurrent ingestion of
    /// different documents never writes the same key.
    pub fn id(&self) -> &str {
        &self.chunk.id
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a session's conversation memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    #[serde(rename = "content")]
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A ranked chunk returned by hybrid search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: u32,
    /// Fused score in `[0.0, dense_weight + sparse_weight]`.
    pub score: f64,
    /// Display name of the originating document.
    pub source_label: String,
    /// Prefix of the chunk text, bounded to the configured preview budget.
    pub preview_text: String,
    /// The whole chunk text, used as LLM context.
    #[serde(skip)]
    pub text: String,
}
