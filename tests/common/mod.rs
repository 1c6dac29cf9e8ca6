//! Test doubles and helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use adaptive_rag::config::{parse_config, Config};
use adaptive_rag::extract::DefaultExtractor;
use adaptive_rag::ingest::UploadedFile;
use adaptive_rag::llm::{ChatMessage, ChatModel, FunctionSpec};
use adaptive_rag::service::{Components, RagService};
use adaptive_rag::websearch::{WebResult, WebSearch};
use adaptive_rag_core::embedding::Embedder;
use adaptive_rag_core::models::{Document, IndexRecord, SparseVector};
use adaptive_rag_core::store::memory::InMemoryStore;
use adaptive_rag_core::store::{ChunkCandidate, VectorStore};

pub const ANSWER: &str = "synthesized answer";

/// Chat double: a fixed classification and a fixed answer.
pub struct FakeChat {
    /// `None` makes every classification call fail.
    pub category: Option<&'static str>,
    pub answer_delay: Duration,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeChat {
    pub fn classifying(category: &'static str) -> Self {
        Self {
            category: Some(category),
            answer_delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn broken_classifier() -> Self {
        Self {
            category: None,
            answer_delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn slow_answers(mut self, delay: Duration) -> Self {
        self.answer_delay = delay;
        self
    }

    pub fn last_prompt(&self) -> Vec<ChatMessage> {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for FakeChat {
    fn model_name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        tokio::time::sleep(self.answer_delay).await;
        Ok(ANSWER.to_string())
    }

    async fn call_function(
        &self,
        _messages: &[ChatMessage],
        _function: &FunctionSpec,
    ) -> Result<String> {
        match self.category {
            Some(c) => Ok(format!(
                r#"{{"classification":"{}","reasoning":"scripted","confidence":0.9}}"#,
                c
            )),
            None => bail!("LLM API error 503: upstream unavailable"),
        }
    }
}

pub enum WebMode {
    Results(Vec<WebResult>),
    Outage,
    Hang,
}

pub struct FakeWeb {
    pub mode: WebMode,
    pub calls: AtomicUsize,
}

impl FakeWeb {
    pub fn new(mode: WebMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearch for FakeWeb {
    async fn search(&self, _query: &str) -> Result<Vec<WebResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            WebMode::Results(r) => Ok(r.clone()),
            WebMode::Outage => bail!("Tavily connection error: connection refused"),
            WebMode::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Deterministic bag-of-words embedder. Any call containing `POISON`
/// fails; every call waits `delay` first.
pub struct HashEmbedder {
    pub delay: Duration,
}

impl HashEmbedder {
    pub const DIMS: usize = 16;

    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self { delay }
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; Self::DIMS];
        for word in text.split_whitespace() {
            let h = word
                .to_lowercase()
                .bytes()
                .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
            v[h % Self::DIMS] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        Self::DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(self.delay).await;
        if texts.iter().any(|t| t.contains("POISON")) {
            bail!("embedding API error 500: bad input");
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// A store backend that never answers.
pub struct StalledStore;

impl StalledStore {
    async fn stall<T>() -> Result<T> {
        std::future::pending().await
    }
}

#[async_trait]
impl VectorStore for StalledStore {
    async fn upsert(&self, _records: &[IndexRecord]) -> Result<()> {
        Self::stall().await
    }
    async fn upsert_document(&self, _doc: &Document) -> Result<()> {
        Self::stall().await
    }
    async fn get(&self, _id: &str) -> Result<Option<IndexRecord>> {
        Self::stall().await
    }
    async fn dense_search(&self, _query: &[f32], _limit: usize) -> Result<Vec<ChunkCandidate>> {
        Self::stall().await
    }
    async fn sparse_search(
        &self,
        _query: &SparseVector,
        _limit: usize,
    ) -> Result<Vec<ChunkCandidate>> {
        Self::stall().await
    }
    async fn count(&self) -> Result<usize> {
        Self::stall().await
    }
    async fn document_count(&self) -> Result<usize> {
        Self::stall().await
    }
    async fn clear(&self) -> Result<()> {
        Self::stall().await
    }
}

/// Config with every external provider disabled and short timeouts.
pub fn test_config(extra: &str) -> Config {
    parse_config(&format!(
        r#"
[server]
bind = "127.0.0.1:0"

[chunking]
chunk_size = 120
chunk_overlap = 20

[embedding]
provider = "disabled"

[llm]
provider = "disabled"

[web_search]
provider = "disabled"

[timeouts]
classify_secs = 2
synthesis_secs = 1
retrieval_secs = 2
web_search_secs = 1
store_busy_ms = 2000
store_secs = 1

{}
"#,
        extra
    ))
    .unwrap()
}

pub struct Harness {
    pub service: Arc<RagService>,
    pub store: Arc<InMemoryStore>,
    pub chat: Arc<FakeChat>,
    pub web: Arc<FakeWeb>,
}

pub fn harness(config: &Config, chat: FakeChat, web: FakeWeb, embedder: HashEmbedder) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let chat = Arc::new(chat);
    let web = Arc::new(web);
    let dyn_store: Arc<dyn VectorStore> = store.clone();
    let service = RagService::with_components(
        config,
        Components {
            store: dyn_store,
            embedder: Arc::new(embedder),
            chat: chat.clone(),
            web: web.clone(),
            extractor: Arc::new(DefaultExtractor),
        },
    );
    Harness {
        service: Arc::new(service),
        store,
        chat,
        web,
    }
}

/// A service over `store` instead of a fresh in-memory one.
pub fn service_with_store(
    config: &Config,
    store: Arc<dyn VectorStore>,
    chat: FakeChat,
    embedder: HashEmbedder,
) -> Arc<RagService> {
    Arc::new(RagService::with_components(
        config,
        Components {
            store,
            embedder: Arc::new(embedder),
            chat: Arc::new(chat),
            web: Arc::new(FakeWeb::new(WebMode::Outage)),
            extractor: Arc::new(DefaultExtractor),
        },
    ))
}

pub fn text_file(name: &str, text: &str) -> UploadedFile {
    UploadedFile {
        file_name: name.to_string(),
        bytes: text.as_bytes().to_vec(),
    }
}

pub fn web_result(title: &str, url: &str, content: &str) -> WebResult {
    WebResult {
        title: title.to_string(),
        url: url.to_string(),
        content: content.to_string(),
    }
}
