//! Ingestion pipeline orchestration.
//!
//! Coordinates the upload flow: extraction → normalization → chunking →
//! embedding → storage. Ingestion is best-effort per chunk: a chunk whose
//! embedding or upsert fails is counted and skipped, already-written chunks
//! are kept, and the result says exactly how many of each there were.
//! Documents in a batch are independent; one failing never aborts another.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use adaptive_rag_core::chunk::{chunk_text, ChunkParams};
use adaptive_rag_core::embedding::{embed_one, Embedder};
use adaptive_rag_core::models::{Chunk, Document, Embedding, IndexRecord};
use adaptive_rag_core::sparse::SparseEncoder;
use adaptive_rag_core::store::VectorStore;

use crate::error::RagError;
use crate::extract::{check_supported, normalize_text, TextExtractor};
use crate::gate::IndexGate;

/// One uploaded file, as received.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Result of ingesting one document's text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub chunk_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// All chunks indexed and the document recorded.
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            chunk_count: 0,
            succeeded: 0,
            failed: 0,
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DocumentStatus {
    Success,
    /// Some chunks are indexed, some are not. Nothing is rolled back.
    Partial { succeeded: usize, failed: usize },
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentReport {
    pub file_name: String,
    pub document_id: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    pub succeeded_chunks: usize,
    pub failed_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentReport {
    fn new(file_name: &str, document_id: &str, outcome: IngestOutcome) -> Self {
        let status = if outcome.success {
            DocumentStatus::Success
        } else if outcome.succeeded > 0 {
            DocumentStatus::Partial {
                succeeded: outcome.succeeded,
                failed: outcome.failed,
            }
        } else {
            DocumentStatus::Failed
        };
        Self {
            file_name: file_name.to_string(),
            document_id: document_id.to_string(),
            status,
            chunk_count: outcome.chunk_count,
            succeeded_chunks: outcome.succeeded,
            failed_chunks: outcome.failed,
            error: outcome.error,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub total_files: usize,
    /// Files whose every chunk was indexed.
    pub successful_files: usize,
    pub failed_files: usize,
    /// Chunks indexed across the batch.
    pub total_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    /// At least one file fully succeeded.
    pub success: bool,
    pub stats: BatchStats,
    pub uploaded_files: Vec<String>,
    pub documents: Vec<DocumentReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct IngestionPipeline {
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    sparse: Arc<dyn SparseEncoder>,
    store: Arc<dyn VectorStore>,
    gate: IndexGate,
    chunking: ChunkParams,
    batch_size: usize,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        sparse: Arc<dyn SparseEncoder>,
        store: Arc<dyn VectorStore>,
        gate: IndexGate,
        chunking: ChunkParams,
        batch_size: usize,
    ) -> Self {
        Self {
            extractor,
            embedder,
            sparse,
            store,
            gate,
            chunking,
            batch_size: batch_size.max(1),
        }
    }

    /// Chunk, encode and index one document's normalized text.
    ///
    /// The document's metadata is recorded once at least one chunk is
    /// indexed. The caller must hold a shared [`IndexGate`] guard.
    pub async fn ingest(&self, document: &Document, normalized_text: &str) -> IngestOutcome {
        let chunks = chunk_text(&document.id, normalized_text, &self.chunking);
        if chunks.is_empty() {
            return IngestOutcome::failed("no extractable text");
        }

        let mut succeeded = 0usize;
        for batch in chunks.chunks(self.batch_size) {
            let dense = self.embed_batch(batch).await;
            let records: Vec<IndexRecord> = batch
                .iter()
                .zip(dense)
                .filter_map(|(chunk, vector)| {
                    let dense = vector?;
                    let embedding = Embedding {
                        chunk_id: chunk.id.clone(),
                        dense,
                        sparse: self.sparse.encode_document(&chunk.text),
                    };
                    Some(IndexRecord::new(
                        chunk.clone(),
                        embedding,
                        &document.original_name,
                    ))
                })
                .collect();
            succeeded += self.store_records(&records).await;
        }

        let chunk_count = chunks.len();
        let failed = chunk_count - succeeded;
        let mut error = (failed > 0).then(|| format!("{} of {} chunks failed", failed, chunk_count));

        if succeeded > 0 {
            if let Err(e) = self.gate.timed(self.store.upsert_document(document)).await {
                tracing::warn!(document_id = %document.id, error = %e, "failed to record document");
                error = Some("document metadata could not be stored".to_string());
            }
        }

        tracing::info!(
            document_id = %document.id,
            file = %document.original_name,
            chunks = chunk_count,
            succeeded,
            failed,
            "document ingested"
        );

        IngestOutcome {
            chunk_count,
            succeeded,
            failed,
            success: error.is_none(),
            error,
        }
    }

    /// Extract and ingest every file independently.
    ///
    /// Fails with [`RagError::Validation`] for an empty batch, and with
    /// [`RagError::StoreBusy`] when a clear kept every file out.
    pub async fn ingest_batch(&self, files: Vec<UploadedFile>) -> Result<BatchReport, RagError> {
        if files.is_empty() {
            return Err(RagError::validation("no files uploaded"));
        }

        let total_files = files.len();
        let mut documents = Vec::with_capacity(total_files);
        let mut busy = 0usize;

        for file in files {
            let document_id = Uuid::new_v4().to_string();
            let outcome = match self.gate.shared().await {
                Ok(_guard) => self.ingest_file(&document_id, &file).await,
                Err(e) => {
                    busy += 1;
                    IngestOutcome::failed(e.to_string())
                }
            };
            if let Some(ref e) = outcome.error {
                tracing::warn!(file = %file.file_name, error = %e, "file not fully ingested");
            }
            documents.push(DocumentReport::new(&file.file_name, &document_id, outcome));
        }

        let successful_files = documents
            .iter()
            .filter(|d| d.status == DocumentStatus::Success)
            .count();
        if successful_files == 0 && busy == total_files {
            return Err(RagError::StoreBusy);
        }

        let stats = BatchStats {
            total_files,
            successful_files,
            failed_files: total_files - successful_files,
            total_chunks: documents.iter().map(|d| d.succeeded_chunks).sum(),
        };
        let uploaded_files = documents
            .iter()
            .filter(|d| d.status == DocumentStatus::Success)
            .map(|d| d.file_name.clone())
            .collect();

        Ok(BatchReport {
            success: successful_files > 0,
            message: (successful_files > 0)
                .then(|| format!("Successfully uploaded {} files", successful_files)),
            error: (successful_files == 0).then(|| "No files were fully ingested".to_string()),
            stats,
            uploaded_files,
            documents,
        })
    }

    async fn ingest_file(&self, document_id: &str, file: &UploadedFile) -> IngestOutcome {
        if let Err(e) = check_supported(&file.file_name) {
            return IngestOutcome::failed(e.to_string());
        }

        let extractor = Arc::clone(&self.extractor);
        let name = file.file_name.clone();
        let bytes = file.bytes.clone();
        let extracted =
            match tokio::task::spawn_blocking(move || extractor.extract(&name, &bytes)).await {
                Ok(Ok(extracted)) => extracted,
                Ok(Err(e)) => return IngestOutcome::failed(e.to_string()),
                Err(e) => return IngestOutcome::failed(format!("extraction task failed: {}", e)),
            };

        let text = normalize_text(&extracted.text);
        if text.is_empty() {
            return IngestOutcome::failed("no extractable text");
        }

        let document = Document {
            id: document_id.to_string(),
            original_name: file.file_name.clone(),
            uploaded_at: Utc::now(),
            byte_size: file.bytes.len() as u64,
            mime_type: extracted.mime_type,
        };
        self.ingest(&document, &text).await
    }

    /// Dense vectors for `batch`, one slot per chunk; `None` marks a chunk
    /// that could not be embedded. A failed batch call is retried chunk by
    /// chunk so only the truly failing chunks are lost.
    async fn embed_batch(&self, batch: &[Chunk]) -> Vec<Option<Vec<f32>>> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        match self.embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() == batch.len() => {
                return vectors.into_iter().map(Some).collect();
            }
            Ok(vectors) => tracing::warn!(
                expected = batch.len(),
                got = vectors.len(),
                "embedding batch returned wrong count, retrying per chunk"
            ),
            Err(e) => tracing::warn!(error = %e, "embedding batch failed, retrying per chunk"),
        }

        let mut out = Vec::with_capacity(batch.len());
        for chunk in batch {
            match embed_one(self.embedder.as_ref(), &chunk.text).await {
                Ok(v) => out.push(Some(v)),
                Err(e) => {
                    tracing::warn!(chunk_id = %chunk.id, ordinal = chunk.ordinal, error = %e, "chunk embedding failed");
                    out.push(None);
                }
            }
        }
        out
    }

    /// Upsert `records`, falling back to one at a time if the batch write
    /// fails or stalls. Returns how many were stored.
    async fn store_records(&self, records: &[IndexRecord]) -> usize {
        if records.is_empty() {
            return 0;
        }
        match self.gate.timed(self.store.upsert(records)).await {
            Ok(()) => return records.len(),
            Err(e) => tracing::warn!(error = %e, "batch upsert failed, retrying per record"),
        }

        let mut stored = 0;
        for record in records {
            match self.gate.timed(self.store.upsert(std::slice::from_ref(record))).await {
                Ok(()) => stored += 1,
                Err(e) => tracing::warn!(chunk_id = %record.id(), error = %e, "record upsert failed"),
            }
        }
        stored
    }
}
