//! HTTP binding for the retrieval pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Readiness, backend and counts |
//! | `POST` | `/rag/search` | `{query, topK?}` ranked prompts |
//! | `POST` | `/rag/ask` | `{query, topK?, language?}` grounded answer |
//! | `POST` | `/reload` | Re-read the corpus file and rebuild |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "RAG pipeline not ready" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_ready` (503), `embedding_failed` (502),
//! `generation_failed` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends can
//! call the API directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use prompt_rag_core::models::{Backend, Language};

use crate::config::Config;
use crate::corpus::load_corpus;
use crate::error::RagError;
use crate::pipeline::{AskResponse, PipelinePhase, RagPipeline, SearchResponse};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<RagPipeline>,
    config: Arc<Config>,
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind` first, then loads the corpus and initializes the
/// pipeline in a background task; requests that arrive before it finishes
/// get `503 not_ready`. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(RagPipeline::from_config(config)?);
    let config = Arc::new(config.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %listener.local_addr()?, "prompt RAG server listening");

    spawn_initialize(pipeline.clone(), config.clone());

    axum::serve(listener, build_router(pipeline.clone(), config))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    pipeline.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn spawn_initialize(pipeline: Arc<RagPipeline>, config: Arc<Config>) {
    tokio::spawn(async move {
        match load_corpus(&config.corpus.path) {
            Ok(corpus) => {
                pipeline.initialize(corpus).await;
            }
            // The pipeline stays not-ready; POST /reload can retry once the file is fixed.
            Err(e) => error!(error = %format!("{:#}", e), "failed to load corpus; pipeline not initialized"),
        }
    });
}

/// Builds the router over an existing pipeline.
pub fn build_router(pipeline: Arc<RagPipeline>, config: Arc<Config>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rag/search", post(handle_search))
        .route("/rag/ask", post(handle_ask))
        .route("/reload", post(handle_reload))
        .layer(cors)
        .with_state(AppState { pipeline, config })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
            RagError::EmptyQuery => (StatusCode::BAD_REQUEST, "bad_request"),
            RagError::Embedding(_) => (StatusCode::BAD_GATEWAY, "embedding_failed"),
            RagError::Generation(_) => (StatusCode::BAD_GATEWAY, "generation_failed"),
            RagError::Index(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn resolve_top_k(requested: Option<usize>, default: usize, max: usize) -> Result<usize, AppError> {
    match requested {
        None => Ok(default),
        Some(k) if (1..=max).contains(&k) => Ok(k),
        Some(k) => Err(bad_request(format!("topK must be between 1 and {} (got {})", max, k))),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    ready: bool,
    phase: PipelinePhase,
    backend: Option<Backend>,
    item_count: usize,
    document_count: usize,
    primary_ready: bool,
    generation: u64,
}

/// Always `200`: readiness is reported in the body, not the status code.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let health = state.pipeline.health().await;
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        ready: health.ready,
        phase: health.phase,
        backend: health.backend,
        item_count: health.item_count,
        document_count: health.document_count,
        primary_ready: health.primary_ready,
        generation: health.generation,
    })
}

// ============ POST /rag/search ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let retrieval = &state.config.retrieval;
    let top_k = resolve_top_k(req.top_k, retrieval.search_top_k, retrieval.max_top_k)?;
    let response = state.pipeline.search(&req.query, top_k).await?;
    Ok(Json(response))
}

// ============ POST /rag/ask ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AskRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    language: Option<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let retrieval = &state.config.retrieval;
    let top_k = resolve_top_k(req.top_k, retrieval.ask_top_k, retrieval.max_top_k)?;
    let language = match req.language.as_deref() {
        Some(code) => Language::from_str(code).map_err(|e| bad_request(e.to_string()))?,
        None => Language::default(),
    };
    let response = state.pipeline.ask(&req.query, top_k, language).await?;
    Ok(Json(response))
}

// ============ POST /reload ============

#[derive(Serialize)]
struct ReloadResponse {
    reloaded: bool,
    count: usize,
    skipped: usize,
    backend: Backend,
    generation: u64,
}

/// Re-reads the configured corpus file and rebuilds the index. Queries keep
/// being served from the previous generation until the swap.
async fn handle_reload(State(state): State<AppState>) -> Result<Json<ReloadResponse>, AppError> {
    let corpus = load_corpus(&state.config.corpus.path).map_err(|e| internal(format!("{:#}", e)))?;
    let report = state.pipeline.reload(Some(corpus)).await;
    Ok(Json(ReloadResponse {
        reloaded: true,
        count: report.item_count(),
        skipped: report.skipped,
        backend: report.backend,
        generation: report.generation,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_top_k() {
        assert_eq!(resolve_top_k(None, 10, 50).unwrap(), 10);
        assert_eq!(resolve_top_k(Some(50), 10, 50).unwrap(), 50);
        assert!(resolve_top_k(Some(0), 10, 50).is_err());
        assert!(resolve_top_k(Some(51), 10, 50).is_err());
    }

    #[test]
    fn test_rag_error_status_mapping() {
        let not_ready = AppError::from(RagError::NotReady);
        assert_eq!(not_ready.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(not_ready.code, "not_ready");

        let empty = AppError::from(RagError::EmptyQuery);
        assert_eq!(empty.status, StatusCode::BAD_REQUEST);

        let failed = AppError::from(RagError::Generation(anyhow::anyhow!("upstream 500")));
        assert_eq!(failed.status, StatusCode::BAD_GATEWAY);
        assert_eq!(failed.code, "generation_failed");
        assert!(failed.message.contains("upstream 500"));
    }
}
