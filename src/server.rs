//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Answer a question with ranked candidates and SQL |
//! | `POST` | `/ingest` | Re-run schema ingestion |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `exhausted` (422), `internal` (500),
//! `upstream_error` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use dbninja_core::pipeline::Pipeline;
use dbninja_core::DbNinjaError;

use crate::config::Config;
use crate::ingest::{run_ingest, IngestSummary};
use crate::query::{build_pipeline, QueryResponse};

/// Per-server defaults and the optional ingestion configuration.
#[derive(Clone)]
pub struct ServerOptions {
    /// Dialect used when a request does not name one.
    pub dialect: String,
    /// Context size used when a request does not give `top_k`.
    pub top_k: usize,
    /// Enables `POST /ingest` when set.
    pub ingest: Option<Arc<Config>>,
}

impl ServerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dialect: config.generation.dialect.clone(),
            top_k: config.retrieval.final_topk,
            ingest: Some(Arc::new(config.clone())),
        }
    }
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    options: ServerOptions,
}

/// Starts the HTTP server on `[server].bind` with the production pipeline.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(build_pipeline(config).await?);
    let listener = TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "dbninja server listening");
    serve(listener, pipeline, ServerOptions::from_config(config)).await
}

/// Serve the API on an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    pipeline: Arc<Pipeline>,
    options: ServerOptions,
) -> anyhow::Result<()> {
    axum::serve(listener, router(pipeline, options)).await?;
    Ok(())
}

pub fn router(pipeline: Arc<Pipeline>, options: ServerOptions) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/ingest", post(handle_ingest))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { pipeline, options })
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
    /// Last rejected SQL, for `exhausted` errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    sql: Option<String>,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    sql: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                sql: self.sql,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        sql: None,
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
        sql: None,
    }
}

fn upstream(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream_error".to_string(),
        message: message.into(),
        sql: None,
    }
}

impl From<DbNinjaError> for AppError {
    fn from(err: DbNinjaError) -> Self {
        let status = match &err {
            DbNinjaError::Transport { .. } => StatusCode::BAD_GATEWAY,
            DbNinjaError::ExhaustedRetries { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DbNinjaError::InvalidParams { .. } => StatusCode::BAD_REQUEST,
        };
        let sql = match &err {
            DbNinjaError::ExhaustedRetries { sql, .. } => Some(sql.clone()),
            _ => None,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
            sql,
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    dialect: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let dialect = req
        .dialect
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(state.options.dialect.as_str());
    let top_k = req.top_k.unwrap_or(state.options.top_k);

    let answer = state
        .pipeline
        .answer(question, dialect, top_k)
        .await
        .map_err(|e| {
            error!(error = %e, "query failed");
            AppError::from(e)
        })?;

    Ok(Json(QueryResponse::from(answer)))
}

// ============ POST /ingest ============

#[derive(Serialize)]
struct IngestResponse {
    status: String,
    #[serde(flatten)]
    summary: IngestSummary,
}

async fn handle_ingest(State(state): State<AppState>) -> Result<Json<IngestResponse>, AppError> {
    let config = state
        .options
        .ingest
        .as_ref()
        .ok_or_else(|| internal("ingestion is not configured on this server"))?;

    let summary = run_ingest(config).await.map_err(|e| {
        let message = format!("{:#}", e);
        error!(error = %message, "ingestion failed");
        upstream(message)
    })?;

    Ok(Json(IngestResponse {
        status: "ok".to_string(),
        summary,
    }))
}
