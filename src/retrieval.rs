//! Hybrid Retrieval Engine.
//!
//! Encodes the question with the same embedder and sparse encoder used at
//! ingestion, then runs the core fusion search against the store. Store and
//! embedding failures are absorbed: an unreachable store yields no results,
//! a failed query embedding degrades to sparse-only. Only the overall time
//! budget is reported to the caller.

use std::sync::Arc;
use std::time::Duration;

use adaptive_rag_core::embedding::{embed_one, Embedder};
use adaptive_rag_core::models::RetrievalResult;
use adaptive_rag_core::search::{self, FusionParams};
use adaptive_rag_core::sparse::SparseEncoder;
use adaptive_rag_core::store::VectorStore;

use crate::error::RagError;

pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    sparse: Arc<dyn SparseEncoder>,
    store: Arc<dyn VectorStore>,
    params: FusionParams,
    timeout: Duration,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        sparse: Arc<dyn SparseEncoder>,
        store: Arc<dyn VectorStore>,
        params: FusionParams,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            sparse,
            store,
            params,
            timeout,
        }
    }

    pub fn params(&self) -> &FusionParams {
        &self.params
    }

    /// Top-`k` chunks for `question`, best first.
    ///
    /// Returns `Ok(vec![])` for an empty question, an empty index or an
    /// unreachable store. Fails only with [`RagError::Timeout`].
    pub async fn search(&self, question: &str, k: usize) -> Result<Vec<RetrievalResult>, RagError> {
        let question = question.trim();
        if question.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        match tokio::time::timeout(self.timeout, self.run(question, k)).await {
            Ok(results) => Ok(results),
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs_f32(), "retrieval timed out");
                Err(RagError::Timeout {
                    service: "retrieval",
                    after: self.timeout,
                })
            }
        }
    }

    async fn run(&self, question: &str, k: usize) -> Vec<RetrievalResult> {
        let sparse = self.sparse.encode_query(question);

        let dense = match embed_one(self.embedder.as_ref(), question).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, using sparse signal only");
                Vec::new()
            }
        };

        match search::search(self.store.as_ref(), &dense, &sparse, k, &self.params).await {
            Ok(results) => {
                tracing::debug!(k, hits = results.len(), "hybrid search");
                results
            }
            Err(e) => {
                tracing::warn!(error = %e, "vector store search failed, treating as no results");
                Vec::new()
            }
        }
    }
}
