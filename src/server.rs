//! HTTP server.
//!
//! Exposes the [`RagService`] over a JSON HTTP API for the chat UI.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health`      | Readiness probe: `healthy` or `unhealthy` |
//! | `GET`    | `/stats`       | Index record count, dimension, document count |
//! | `POST`   | `/upload`      | Multipart upload, field `files` (one or more) |
//! | `POST`   | `/query`       | `{question}` → `{answer, sources, method}` |
//! | `POST`   | `/clear`       | Clear the index and all conversation memory |
//! | `GET`    | `/formats`     | Accepted upload extensions |
//! | `GET`    | `/chat/memory` | The session's conversation memory |
//! | `DELETE` | `/chat/memory` | Clear the session's conversation memory |
//!
//! The session is taken from the `x-session-id` header, `"default"` when
//! absent.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `store_busy` (503), `not_ready` (503),
//! `timeout` (504), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser UI can be
//! served from anywhere.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::RagError;
use crate::extract::SUPPORTED_EXTENSIONS;
use crate::ingest::UploadedFile;
use crate::service::RagService;

pub const SESSION_HEADER: &str = "x-session-id";
const DEFAULT_SESSION: &str = "default";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    service: Arc<RagService>,
}

/// Build the service from `config`, bind `[server].bind` and serve until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(RagService::from_config(config).await?);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %config.server.bind, ready = service.is_ready(), "server listening");

    serve_on(
        listener,
        service.clone(),
        config.server.max_upload_bytes,
        shutdown_signal(),
    )
    .await?;

    service.shutdown().await;
    Ok(())
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    service: Arc<RagService>,
    max_upload_bytes: usize,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, router(service, max_upload_bytes))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub fn router(service: Arc<RagService>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/upload", post(handle_upload))
        .route("/query", post(handle_query))
        .route("/clear", post(handle_clear))
        .route("/formats", get(handle_formats))
        .route("/chat/memory", get(handle_get_memory).delete(handle_clear_memory))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(AppState { service })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SESSION)
        .to_string()
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"store_busy"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::Validation(_) => StatusCode::BAD_REQUEST,
            RagError::StoreBusy | RagError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            RagError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RagError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::from(RagError::validation(message))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status) = if state.service.is_ready() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };
    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Response, AppError> {
    let stats = state.service.stats().await?;
    Ok(Json(stats).into_response())
}

// ============ POST /upload ============

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    state.service.ensure_ready()?;

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let file_name = match field.file_name() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => continue,
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read '{}': {}", file_name, e)))?;
        files.push(UploadedFile {
            file_name,
            bytes: bytes.to_vec(),
        });
    }

    let report = state.service.upload(files).await?;
    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok((status, Json(report)).into_response())
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;
    let response = state
        .service
        .query(&session_id(&headers), &req.question)
        .await?;
    Ok(Json(response).into_response())
}

// ============ POST /clear ============

async fn handle_clear(State(state): State<AppState>) -> Result<Response, AppError> {
    state.service.clear().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Index cleared successfully",
    }))
    .into_response())
}

// ============ GET /formats ============

async fn handle_formats() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "formats": SUPPORTED_EXTENSIONS }))
}

// ============ /chat/memory ============

async fn handle_get_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let memory = state.service.memory(&session_id(&headers))?;
    Ok(Json(serde_json::json!({ "memory": memory })).into_response())
}

async fn handle_clear_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    state.service.clear_memory(&session_id(&headers))?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Chat memory cleared",
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_session_id_defaults() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_id(&headers), "default");
        headers.insert(SESSION_HEADER, HeaderValue::from_static("  "));
        assert_eq!(session_id(&headers), "default");
        headers.insert(SESSION_HEADER, HeaderValue::from_static("tab-7"));
        assert_eq!(session_id(&headers), "tab-7");
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (RagError::validation("x"), StatusCode::BAD_REQUEST),
            (RagError::StoreBusy, StatusCode::SERVICE_UNAVAILABLE),
            (RagError::NotReady("k".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                RagError::Timeout {
                    service: "vector store",
                    after: std::time::Duration::from_secs(1),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (RagError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}
