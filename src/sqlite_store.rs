//! SQLite-backed [`VectorStore`] implementation.
//!
//! Records keep the dense vector as a little-endian `f32` BLOB and the
//! sparse vector as JSON. Both searches load candidates and score them in
//! Rust, the same brute-force approach as the in-memory backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use adaptive_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use adaptive_rag_core::models::{Chunk, Document, IndexRecord, SparseVector};
use adaptive_rag_core::sparse::sparse_dot;
use adaptive_rag_core::store::{sort_candidates, ChunkCandidate, VectorStore};

use crate::{db, migrate};

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `path` and create the schema if needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("Failed to open index database: {}", path.display()))?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_record(row: &SqliteRow) -> Result<IndexRecord> {
    let blob: Vec<u8> = row.try_get("dense")?;
    let sparse_json: String = row.try_get("sparse_json")?;
    let sparse: SparseVector = serde_json::from_str(&sparse_json)
        .with_context(|| "Corrupt sparse vector in records table")?;
    let ordinal: i64 = row.try_get("ordinal")?;
    let char_start: i64 = row.try_get("char_start")?;
    let char_end: i64 = row.try_get("char_end")?;

    Ok(IndexRecord {
        chunk: Chunk {
            id: row.try_get("id")?,
            document_id: row.try_get("document_id")?,
            ordinal: ordinal as u32,
            text: row.try_get("text")?,
            char_start: char_start as usize,
            char_end: char_end as usize,
        },
        dense: blob_to_vec(&blob),
        sparse,
        title: row.try_get("title")?,
    })
}

const SELECT_RECORDS: &str = r#"
    SELECT id, document_id, ordinal, text, char_start, char_end, title, dense, sparse_json
    FROM records
"#;

impl SqliteStore {
    async fn load_all(&self) -> Result<Vec<IndexRecord>> {
        let rows = sqlx::query(SELECT_RECORDS).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            let sparse_json = serde_json::to_string(&record.sparse)?;
            sqlx::query(
                r#"
                INSERT INTO records (id, document_id, ordinal, text, char_start, char_end,
                                     title, dense, sparse_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    document_id = excluded.document_id,
                    ordinal = excluded.ordinal,
                    text = excluded.text,
                    char_start = excluded.char_start,
                    char_end = excluded.char_end,
                    title = excluded.title,
                    dense = excluded.dense,
                    sparse_json = excluded.sparse_json
                "#,
            )
            .bind(record.id())
            .bind(&record.chunk.document_id)
            .bind(record.chunk.ordinal as i64)
            .bind(&record.chunk.text)
            .bind(record.chunk.char_start as i64)
            .bind(record.chunk.char_end as i64)
            .bind(&record.title)
            .bind(vec_to_blob(&record.dense))
            .bind(sparse_json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, original_name, uploaded_at, byte_size, mime_type)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                original_name = excluded.original_name,
                uploaded_at = excluded.uploaded_at,
                byte_size = excluded.byte_size,
                mime_type = excluded.mime_type
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.original_name)
        .bind(doc.uploaded_at.to_rfc3339())
        .bind(doc.byte_size as i64)
        .bind(&doc.mime_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<IndexRecord>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_RECORDS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn dense_search(&self, query: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        // Fetch all vectors and compute cosine similarity in Rust
        let mut candidates: Vec<ChunkCandidate> = self
            .load_all()
            .await?
            .iter()
            .filter_map(|r| {
                let score = cosine_similarity(query, &r.dense) as f64;
                score
                    .is_finite()
                    .then(|| ChunkCandidate::from_record(r, score))
            })
            .collect();

        sort_candidates(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn sparse_search(
        &self,
        query: &SparseVector,
        limit: usize,
    ) -> Result<Vec<ChunkCandidate>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<ChunkCandidate> = self
            .load_all()
            .await?
            .iter()
            .filter_map(|r| {
                let score = sparse_dot(query, &r.sparse) as f64;
                (score.is_finite() && score > 0.0).then(|| ChunkCandidate::from_record(r, score))
            })
            .collect();

        sort_candidates(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn document_count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM records").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM documents").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}
