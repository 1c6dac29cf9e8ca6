//! TOML configuration.
//!
//! Loaded once at startup by [`load_config`] and passed by reference (or in
//! an `Arc`) to everything that needs it. Every section except `[server]`
//! is optional and falls back to the defaults below. Credentials never live
//! in the file: they are read from `OPENAI_API_KEY` and `TAVILY_API_KEY`.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [retrieval]
//! top_k = 5
//! dense_weight = 0.5
//! sparse_weight = 0.5
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use adaptive_rag_core::chunk::ChunkParams;
use adaptive_rag_core::search::FusionParams;
use adaptive_rag_core::sparse::Bm25Params;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const TAVILY_API_KEY: &str = "TAVILY_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sparse: SparseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    #[serde(default = "default_weight")]
    pub dense_weight: f64,
    #[serde(default = "default_weight")]
    pub sparse_weight: f64,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

fn default_top_k() -> usize {
    5
}
fn default_overfetch_factor() -> usize {
    4
}
fn default_weight() -> f64 {
    0.5
}
fn default_preview_chars() -> usize {
    200
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            overfetch_factor: default_overfetch_factor(),
            dense_weight: default_weight(),
            sparse_weight: default_weight(),
            preview_chars: default_preview_chars(),
        }
    }
}

impl RetrievalConfig {
    pub fn fusion(&self) -> FusionParams {
        FusionParams {
            dense_weight: self.dense_weight,
            sparse_weight: self.sparse_weight,
            overfetch_factor: self.overfetch_factor,
            preview_chars: self.preview_chars,
        }
    }
}

/// Dense embedding provider settings.
///
/// `provider = "disabled"` turns the dense signal off: records carry empty
/// vectors and retrieval runs on the sparse signal alone.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, or an OpenAI-compatible endpoint).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SparseConfig {
    #[serde(default = "default_k1")]
    pub k1: f32,
    #[serde(default = "default_b")]
    pub b: f32,
    #[serde(default = "default_avg_doc_len")]
    pub avg_doc_len: f32,
}

fn default_k1() -> f32 {
    1.2
}
fn default_b() -> f32 {
    0.75
}
fn default_avg_doc_len() -> f32 {
    200.0
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            avg_doc_len: default_avg_doc_len(),
        }
    }
}

impl SparseConfig {
    pub fn params(&self) -> Bm25Params {
        Bm25Params {
            k1: self.k1,
            b: self.b,
            avg_doc_len: self.avg_doc_len,
        }
    }
}

/// Chat model used for classification and answer synthesis.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.5
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            temperature: default_temperature(),
            base_url: default_llm_base_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebSearchConfig {
    #[serde(default = "default_web_provider")]
    pub provider: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_depth")]
    pub search_depth: String,
    #[serde(default = "default_web_url")]
    pub url: String,
    #[serde(default = "default_web_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_web_provider() -> String {
    "tavily".to_string()
}
fn default_max_results() -> usize {
    5
}
fn default_search_depth() -> String {
    "advanced".to_string()
}
fn default_web_url() -> String {
    "https://api.tavily.com".to_string()
}
fn default_web_timeout_secs() -> u64 {
    15
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            provider: default_web_provider(),
            max_results: default_max_results(),
            search_depth: default_search_depth(),
            url: default_web_url(),
            timeout_secs: default_web_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    /// Turns kept per session.
    #[serde(default = "default_memory_capacity")]
    pub capacity: usize,
    /// Most recent turns handed to the LLM as context.
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,
    /// Sessions kept at once; the least recently used is dropped past this.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_memory_capacity() -> usize {
    10
}
fn default_context_turns() -> usize {
    4
}
fn default_max_sessions() -> usize {
    1000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_memory_capacity(),
            context_turns: default_context_turns(),
            max_sessions: default_max_sessions(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "memory".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutsConfig {
    #[serde(default = "default_classify_secs")]
    pub classify_secs: u64,
    #[serde(default = "default_synthesis_secs")]
    pub synthesis_secs: u64,
    #[serde(default = "default_retrieval_secs")]
    pub retrieval_secs: u64,
    #[serde(default = "default_web_timeout_secs")]
    pub web_search_secs: u64,
    /// How long ingestion and queries wait for an in-progress clear.
    #[serde(default = "default_store_busy_ms")]
    pub store_busy_ms: u64,
    /// Bound on a single vector store call.
    #[serde(default = "default_store_secs")]
    pub store_secs: u64,
}

fn default_classify_secs() -> u64 {
    10
}
fn default_synthesis_secs() -> u64 {
    45
}
fn default_retrieval_secs() -> u64 {
    15
}
fn default_store_busy_ms() -> u64 {
    2000
}
fn default_store_secs() -> u64 {
    10
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            classify_secs: default_classify_secs(),
            synthesis_secs: default_synthesis_secs(),
            retrieval_secs: default_retrieval_secs(),
            web_search_secs: default_web_timeout_secs(),
            store_busy_ms: default_store_busy_ms(),
            store_secs: default_store_secs(),
        }
    }
}

impl TimeoutsConfig {
    pub fn classify(&self) -> Duration {
        Duration::from_secs(self.classify_secs)
    }
    pub fn synthesis(&self) -> Duration {
        Duration::from_secs(self.synthesis_secs)
    }
    pub fn retrieval(&self) -> Duration {
        Duration::from_secs(self.retrieval_secs)
    }
    pub fn web_search(&self) -> Duration {
        Duration::from_secs(self.web_search_secs)
    }
    pub fn store_busy(&self) -> Duration {
        Duration::from_millis(self.store_busy_ms)
    }
    pub fn store(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }
}

impl Config {
    /// Environment variables the configured providers need but that are unset.
    ///
    /// A non-empty result means the service must not report ready.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let needs_openai = self.embedding.provider == "openai" || self.llm.provider == "openai";
        let needs_tavily = self.web_search.provider == "tavily";

        let mut missing = Vec::new();
        if needs_openai && !env_is_set(OPENAI_API_KEY) {
            missing.push(OPENAI_API_KEY);
        }
        if needs_tavily && !env_is_set(TAVILY_API_KEY) {
            missing.push(TAVILY_API_KEY);
        }
        missing
    }
}

fn env_is_set(name: &str) -> bool {
    std::env::var(name).map(|v| !v.trim().is_empty()).unwrap_or(false)
}

/// Read, parse and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    // Validate retrieval
    let r = &config.retrieval;
    if r.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if r.overfetch_factor < 1 {
        bail!("retrieval.overfetch_factor must be >= 1");
    }
    for (name, w) in [("dense_weight", r.dense_weight), ("sparse_weight", r.sparse_weight)] {
        if !w.is_finite() || w < 0.0 {
            bail!("retrieval.{} must be a finite number >= 0", name);
        }
    }
    if r.dense_weight + r.sparse_weight <= 0.0 {
        bail!("retrieval.dense_weight and retrieval.sparse_weight must not both be 0");
    }
    if r.preview_chars == 0 {
        bail!("retrieval.preview_chars must be > 0");
    }

    // Validate embedding
    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if e.dims.is_none() || e.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
            }
            if e.model.is_none() {
                bail!("embedding.model must be specified when provider is '{}'", e.provider);
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if e.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Validate sparse
    let s = &config.sparse;
    if !(s.k1 >= 0.0 && (0.0..=1.0).contains(&s.b) && s.avg_doc_len > 0.0) {
        bail!("sparse: k1 must be >= 0, b in [0, 1], avg_doc_len > 0");
    }

    match config.llm.provider.as_str() {
        "openai" | "disabled" => {}
        other => bail!("Unknown llm provider: '{}'. Must be openai or disabled.", other),
    }
    match config.web_search.provider.as_str() {
        "tavily" | "disabled" => {}
        other => bail!(
            "Unknown web_search provider: '{}'. Must be tavily or disabled.",
            other
        ),
    }

    match config.store.backend.as_str() {
        "memory" => {}
        "sqlite" => {
            if config.store.path.is_none() {
                bail!("store.path must be set when store.backend is 'sqlite'");
            }
        }
        other => bail!("Unknown store backend: '{}'. Must be memory or sqlite.", other),
    }

    if config.memory.max_sessions == 0 {
        bail!("memory.max_sessions must be > 0");
    }

    let t = &config.timeouts;
    if t.classify_secs == 0
        || t.synthesis_secs == 0
        || t.retrieval_secs == 0
        || t.web_search_secs == 0
        || t.store_secs == 0
    {
        bail!("timeouts must be > 0 seconds");
    }

    Ok(())
}
