//! In-memory [`VectorStore`] for tests and the `memory` backend.
//!
//! Records live in a `BTreeMap` behind `std::sync::RwLock`. Both searches
//! are brute force over all records.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Document, IndexRecord, SparseVector};
use crate::sparse::sparse_dot;

use super::{sort_candidates, ChunkCandidate, VectorStore};

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, IndexRecord>,
    documents: BTreeMap<String, Document>,
}

/// In-memory store. Cheap to construct; share it behind an `Arc`.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded metadata of document `id`.
    pub fn document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.documents.get(id).cloned())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn top(&self, limit: usize, score: impl Fn(&IndexRecord) -> f64) -> Result<Vec<ChunkCandidate>> {
        let inner = self.read()?;
        let mut candidates: Vec<ChunkCandidate> = inner
            .records
            .values()
            .filter_map(|r| {
                let s = score(r);
                s.is_finite().then(|| ChunkCandidate::from_record(r, s))
            })
            .collect();
        sort_candidates(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()> {
        let mut inner = self.write()?;
        for r in records {
            inner.records.insert(r.id().to_string(), r.clone());
        }
        Ok(())
    }

    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        self.write()?.documents.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<IndexRecord>> {
        Ok(self.read()?.records.get(id).cloned())
    }

    async fn dense_search(&self, query: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.top(limit, |r| cosine_similarity(query, &r.dense) as f64)
    }

    async fn sparse_search(
        &self,
        query: &SparseVector,
        limit: usize,
    ) -> Result<Vec<ChunkCandidate>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits = self.top(usize::MAX, |r| sparse_dot(query, &r.sparse) as f64)?;
        hits.retain(|c| c.raw_score > 0.0);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.records.len())
    }

    async fn document_count(&self) -> Result<usize> {
        Ok(self.read()?.documents.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.records.clear();
        inner.documents.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Embedding};

    fn record(doc: &str, ordinal: u32, text: &str, dense: Vec<f32>, terms: &[(&str, f32)]) -> IndexRecord {
        let chunk = Chunk {
            id: crate::chunk::chunk_id(doc, ordinal),
            document_id: doc.to_string(),
            ordinal,
            text: text.to_string(),
            char_start: 0,
            char_end: text.chars().count(),
        };
        let embedding = Embedding {
            chunk_id: chunk.id.clone(),
            dense,
            sparse: terms.iter().map(|(t, w)| (t.to_string(), *w)).collect(),
        };
        IndexRecord::new(chunk, embedding, format!("{}.txt", doc))
    }

    #[tokio::test]
    async fn test_upsert_get_and_count() {
        let store = InMemoryStore::new();
        let r = record("d1", 0, "hello", vec![1.0, 0.0], &[("hello", 1.0)]);
        store.upsert(&[r.clone()]).await.unwrap();
        store.upsert(&[r.clone()]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get(r.id()).await.unwrap(), Some(r));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dense_search_orders_by_similarity() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                record("d1", 0, "a", vec![1.0, 0.0], &[]),
                record("d1", 1, "b", vec![0.0, 1.0], &[]),
                record("d2", 0, "c", vec![0.7, 0.7], &[]),
            ])
            .await
            .unwrap();
        let hits = store.dense_search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "a");
        assert_eq!(hits[1].text, "c");
    }

    #[tokio::test]
    async fn test_sparse_search_skips_non_matching() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                record("d1", 0, "coffee", vec![1.0], &[("coffee", 0.8)]),
                record("d1", 1, "pizza", vec![1.0], &[("pizza", 0.8)]),
            ])
            .await
            .unwrap();
        let query: SparseVector = [("coffee".to_string(), 1.0)].into_iter().collect();
        let hits = store.sparse_search(&query, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "coffee");
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let store = InMemoryStore::new();
        store.upsert(&[record("d1", 0, "x", vec![1.0], &[])]).await.unwrap();
        store
            .upsert_document(&Document {
                id: "d1".into(),
                original_name: "d1.txt".into(),
                uploaded_at: chrono::Utc::now(),
                byte_size: 1,
                mime_type: "text/plain".into(),
            })
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.document_count().await.unwrap(), 0);
        assert!(store.dense_search(&[1.0], 5).await.unwrap().is_empty());
    }
}
