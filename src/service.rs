//! Service assembly.
//!
//! [`RagService`] owns the vector store, the index gate, the session
//! memories and every provider handle for the life of the process. It is
//! built once at startup, either from config or from injected components,
//! and shared behind an `Arc` by the HTTP server and the CLI.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use adaptive_rag_core::embedding::Embedder;
use adaptive_rag_core::memory::SessionMemories;
use adaptive_rag_core::models::{ConversationTurn, RetrievalResult};
use adaptive_rag_core::sparse::Bm25Encoder;
use adaptive_rag_core::store::memory::InMemoryStore;
use adaptive_rag_core::store::VectorStore;

use crate::classifier::QueryClassifier;
use crate::config::Config;
use crate::embedding::{create_embedder, DisabledEmbedder};
use crate::error::RagError;
use crate::extract::{DefaultExtractor, TextExtractor};
use crate::gate::IndexGate;
use crate::ingest::{BatchReport, IngestionPipeline, UploadedFile};
use crate::llm::{create_chat_model, ChatModel, DisabledChat};
use crate::retrieval::RetrievalEngine;
use crate::router::{QueryResponse, Router, RouterSettings};
use crate::sqlite_store::SqliteStore;
use crate::websearch::{create_web_search, DisabledWebSearch, WebSearch};

/// Provider and store handles the service is assembled from.
pub struct Components {
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatModel>,
    pub web: Arc<dyn WebSearch>,
    pub extractor: Arc<dyn TextExtractor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_vector_count: usize,
    pub dimension: usize,
    pub document_count: usize,
}

pub struct RagService {
    store: Arc<dyn VectorStore>,
    sqlite: Option<Arc<SqliteStore>>,
    gate: IndexGate,
    memories: Arc<SessionMemories>,
    retrieval: Arc<RetrievalEngine>,
    router: Router,
    pipeline: IngestionPipeline,
    dimension: usize,
    top_k: usize,
    /// Why the service refuses work, if it does.
    not_ready: Option<String>,
}

impl RagService {
    /// Build every component from `config`.
    ///
    /// Missing credentials do not fail construction: the service comes up
    /// not ready, with disabled providers standing in, so `/health` can say
    /// so.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let (store, sqlite): (Arc<dyn VectorStore>, Option<Arc<SqliteStore>>) =
            match config.store.backend.as_str() {
                "sqlite" => {
                    let path = config
                        .store
                        .path
                        .as_deref()
                        .ok_or_else(|| anyhow::anyhow!("store.path must be set for sqlite"))?;
                    let sqlite = Arc::new(SqliteStore::open(path).await?);
                    let store: Arc<dyn VectorStore> = sqlite.clone();
                    (store, Some(sqlite))
                }
                _ => {
                    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::new());
                    (store, None)
                }
            };

        let missing = config.missing_credentials();
        let components = if missing.is_empty() {
            Components {
                store,
                embedder: create_embedder(&config.embedding)?,
                chat: create_chat_model(&config.llm)?,
                web: create_web_search(&config.web_search)?,
                extractor: Arc::new(DefaultExtractor),
            }
        } else {
            tracing::error!(missing = ?missing, "required credentials are not set; service is not ready");
            Components {
                store,
                embedder: Arc::new(DisabledEmbedder),
                chat: Arc::new(DisabledChat),
                web: Arc::new(DisabledWebSearch),
                extractor: Arc::new(DefaultExtractor),
            }
        };

        let mut service = Self::with_components(config, components);
        service.sqlite = sqlite;
        if !missing.is_empty() {
            service.not_ready = Some(format!("missing credentials: {}", missing.join(", ")));
        }
        Ok(service)
    }

    /// Assemble the service around the given components. Always ready.
    pub fn with_components(config: &Config, components: Components) -> Self {
        let Components {
            store,
            embedder,
            chat,
            web,
            extractor,
        } = components;

        let gate = IndexGate::new(config.timeouts.store_busy(), config.timeouts.store());
        let memories = Arc::new(SessionMemories::new(
            config.memory.capacity,
            config.memory.max_sessions,
        ));
        let sparse = Arc::new(Bm25Encoder::new(config.sparse.params()));

        let retrieval = Arc::new(RetrievalEngine::new(
            embedder.clone(),
            sparse.clone(),
            store.clone(),
            config.retrieval.fusion(),
            config.timeouts.retrieval(),
        ));

        let router = Router::new(
            QueryClassifier::new(chat.clone(), config.timeouts.classify()),
            retrieval.clone(),
            web,
            chat,
            memories.clone(),
            store.clone(),
            gate.clone(),
            RouterSettings {
                top_k: config.retrieval.top_k,
                context_turns: config.memory.context_turns,
                synthesis_timeout: config.timeouts.synthesis(),
                web_search_timeout: config.timeouts.web_search(),
                preview_chars: config.retrieval.preview_chars,
            },
        );

        let dimension = config.embedding.dims.unwrap_or_else(|| embedder.dims());
        let pipeline = IngestionPipeline::new(
            extractor,
            embedder,
            sparse,
            store.clone(),
            gate.clone(),
            config.chunking.params(),
            config.embedding.batch_size,
        );

        Self {
            store,
            sqlite: None,
            gate,
            memories,
            retrieval,
            router,
            pipeline,
            dimension,
            top_k: config.retrieval.top_k,
            not_ready: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.not_ready.is_none()
    }

    pub fn ensure_ready(&self) -> Result<(), RagError> {
        match &self.not_ready {
            None => Ok(()),
            Some(reason) => Err(RagError::NotReady(reason.clone())),
        }
    }

    /// Run the adaptive router for one question.
    pub async fn query(&self, session: &str, question: &str) -> Result<QueryResponse, RagError> {
        self.ensure_ready()?;
        self.router.route(session, question).await
    }

    /// Ingest a batch of uploaded files.
    pub async fn upload(&self, files: Vec<UploadedFile>) -> Result<BatchReport, RagError> {
        self.ensure_ready()?;
        self.pipeline.ingest_batch(files).await
    }

    /// Hybrid retrieval only, without routing or synthesis.
    pub async fn search(
        &self,
        question: &str,
        k: Option<usize>,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        self.ensure_ready()?;
        if question.trim().is_empty() {
            return Err(RagError::validation("question must not be empty"));
        }
        let _guard = self.gate.shared().await?;
        self.retrieval.search(question, k.unwrap_or(self.top_k)).await
    }

    pub async fn stats(&self) -> Result<IndexStats, RagError> {
        self.ensure_ready()?;
        Ok(IndexStats {
            total_vector_count: self.gate.timed(self.store.count()).await?,
            dimension: self.dimension,
            document_count: self.gate.timed(self.store.document_count()).await?,
        })
    }

    /// Remove every record and document, then every session's memory.
    ///
    /// Waits for in-flight ingestion and queries to finish; reports
    /// success only after the store confirmed the clear. Memory is kept
    /// when the store clear fails or stalls.
    pub async fn clear(&self) -> Result<(), RagError> {
        self.ensure_ready()?;
        let _guard = self.gate.exclusive().await?;
        tracing::info!("clearing index");
        self.gate.timed(self.store.clear()).await?;
        self.memories.clear_all();
        tracing::info!("index cleared");
        Ok(())
    }

    pub fn memory(&self, session: &str) -> Result<Vec<ConversationTurn>, RagError> {
        self.ensure_ready()?;
        Ok(self.memories.all(session))
    }

    pub fn clear_memory(&self, session: &str) -> Result<(), RagError> {
        self.ensure_ready()?;
        self.memories.clear(session);
        Ok(())
    }

    /// Release store connections.
    pub async fn shutdown(&self) {
        if let Some(sqlite) = &self.sqlite {
            sqlite.close().await;
        }
        tracing::info!("service stopped");
    }
}
