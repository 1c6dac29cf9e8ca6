//! Caller-visible error taxonomy.
//!
//! Internal plumbing uses `anyhow`; anything that crosses the service
//! boundary (HTTP, CLI) is a [`RagError`]. LLM, web search and retrieval
//! failures during a query never become a `RagError`; the router absorbs
//! them into a degraded answer tagged with its method.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Bad input, rejected before any external call.
    #[error("{0}")]
    Validation(String),

    /// A full-index clear holds the store; retry shortly.
    #[error("store busy: an index clear is in progress, retry shortly")]
    StoreBusy,

    /// Required credentials or connections are missing.
    #[error("service not ready: {0}")]
    NotReady(String),

    #[error("{service} timed out after {}s", after.as_secs_f32())]
    Timeout {
        service: &'static str,
        after: Duration,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn validation(message: impl Into<String>) -> Self {
        RagError::Validation(message.into())
    }

    /// Machine-readable code used in the JSON error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Validation(_) => "bad_request",
            RagError::StoreBusy => "store_busy",
            RagError::NotReady(_) => "not_ready",
            RagError::Timeout { .. } => "timeout",
            RagError::Internal(_) => "internal",
        }
    }
}

impl From<anyhow::Error> for RagError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "internal error");
        RagError::Internal("unexpected failure, see server logs".to_string())
    }
}

/// First `max` characters of `s`, with `...` appended when cut.
pub fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => format!("{}...", &s[..i]),
        None => s.to_string(),
    }
}
