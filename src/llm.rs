//! Chat model capability and the OpenAI-compatible client.
//!
//! The router needs two things from an LLM: free-text completion for answer
//! synthesis, and a forced function call for classification. Both go through
//! the [`ChatModel`] trait so tests can swap in a scripted double.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LlmConfig, OPENAI_API_KEY};
use crate::http;

/// One chat message in the OpenAI wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A function the model is forced to call.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Plain completion; returns the assistant message text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Force a call to `function`; returns the raw JSON arguments string.
    async fn call_function(&self, messages: &[ChatMessage], function: &FunctionSpec)
        -> Result<String>;
}

// ============ Disabled ============

/// Chat model used when `llm.provider = "disabled"`. Every call fails, which
/// sends classification to the keyword fallback.
pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("LLM provider is disabled")
    }
    async fn call_function(
        &self,
        _messages: &[ChatMessage],
        _function: &FunctionSpec,
    ) -> Result<String> {
        bail!("LLM provider is disabled")
    }
}

// ============ OpenAI ============

/// Chat client for `POST {base_url}/chat/completions`.
pub struct OpenAiChat {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key =
            std::env::var(OPENAI_API_KEY).map_err(|_| anyhow!("{} not set", OPENAI_API_KEY))?;
        Ok(Self {
            client: http::client(Duration::from_secs(config.timeout_secs))?,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    async fn post(&self, body: serde_json::Value) -> Result<serde_json::Value> {
        http::post_json_with_retry(
            &self.client,
            "OpenAI",
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let json = self
            .post(serde_json::json!({
                "model": self.model,
                "temperature": self.temperature,
                "messages": messages,
            }))
            .await?;
        parse_completion(&json)
    }

    async fn call_function(
        &self,
        messages: &[ChatMessage],
        function: &FunctionSpec,
    ) -> Result<String> {
        let json = self
            .post(serde_json::json!({
                "model": self.model,
                "temperature": 0.0,
                "messages": messages,
                "tools": [{
                    "type": "function",
                    "function": {
                        "name": function.name,
                        "description": function.description,
                        "parameters": function.parameters,
                    }
                }],
                "tool_choice": {
                    "type": "function",
                    "function": { "name": function.name }
                },
            }))
            .await?;
        parse_function_call(&json, &function.name)
    }
}

fn first_message(json: &serde_json::Value) -> Result<&serde_json::Value> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message"))
}

fn parse_completion(json: &serde_json::Value) -> Result<String> {
    first_message(json)?
        .get("content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid chat response: missing message content"))
}

fn parse_function_call(json: &serde_json::Value, name: &str) -> Result<String> {
    let calls = first_message(json)?
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .ok_or_else(|| anyhow!("model did not call a function"))?;
    let call = calls
        .iter()
        .filter_map(|c| c.get("function"))
        .find(|f| f.get("name").and_then(|n| n.as_str()) == Some(name))
        .ok_or_else(|| anyhow!("model did not call '{}'", name))?;
    call.get("arguments")
        .and_then(|a| a.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("function call '{}' has no arguments", name))
}

/// Create the [`ChatModel`] selected by `config.provider`.
pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledChat)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
