//! Web Search Client capability and the Tavily implementation.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{WebSearchConfig, TAVILY_API_KEY};
use crate::http;

/// One web search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    /// Page excerpt returned by the search provider.
    pub content: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<WebResult>>;
}

/// Used when `web_search.provider = "disabled"`; every search fails, so
/// web questions degrade to a general answer.
pub struct DisabledWebSearch;

#[async_trait]
impl WebSearch for DisabledWebSearch {
    async fn search(&self, _query: &str) -> Result<Vec<WebResult>> {
        bail!("web search is disabled")
    }
}

/// Client for Tavily's `POST /search`.
pub struct TavilySearch {
    client: reqwest::Client,
    url: String,
    api_key: String,
    max_results: usize,
    search_depth: String,
}

impl TavilySearch {
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        let api_key =
            std::env::var(TAVILY_API_KEY).map_err(|_| anyhow!("{} not set", TAVILY_API_KEY))?;
        Ok(Self {
            client: http::client(Duration::from_secs(config.timeout_secs))?,
            url: format!("{}/search", config.url.trim_end_matches('/')),
            api_key,
            max_results: config.max_results,
            search_depth: config.search_depth.clone(),
        })
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str) -> Result<Vec<WebResult>> {
        let body = serde_json::json!({
            "query": query,
            "search_depth": self.search_depth,
            "max_results": self.max_results,
        });
        // The router owns the single retry for web search.
        let json =
            http::post_json_with_retry(&self.client, "Tavily", &self.url, Some(&self.api_key), &body, 0)
                .await?;
        parse_tavily_response(&json)
    }
}

fn parse_tavily_response(json: &serde_json::Value) -> Result<Vec<WebResult>> {
    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow!("Invalid Tavily response: missing results array"))?;

    let field = |r: &serde_json::Value, key: &str| {
        r.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    Ok(results
        .iter()
        .map(|r| {
            let title = field(r, "title");
            WebResult {
                title: if title.is_empty() {
                    "Unknown".to_string()
                } else {
                    title
                },
                url: field(r, "url"),
                content: field(r, "content"),
            }
        })
        .collect())
}

/// Create the [`WebSearch`] selected by `config.provider`.
pub fn create_web_search(config: &WebSearchConfig) -> Result<Arc<dyn WebSearch>> {
    match config.provider.as_str() {
        "tavily" => Ok(Arc::new(TavilySearch::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledWebSearch)),
        other => bail!("Unknown web_search provider: {}", other),
    }
}
