//! Read-only JSON HTTP API for dashboards.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check (returns version) |
//! | `GET` | `/api/agencies` | Agency ids and display names |
//! | `GET` | `/api/agency-history?agencyId=` | Word-count series, oldest first |
//! | `GET` | `/api/agency-word-counts` | Departments with rolled-up latest counts |
//! | `GET` | `/api/search?query=&agencyId=` | Top 10 semantic matches |
//! | `GET` | `/api/status` | Checkpoint and table counts |
//!
//! Errors use one shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query is required" } }
//! ```
//!
//! CORS is open to all origins.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::query;

#[derive(Clone)]
struct AppState {
    pool: SqlitePool,
    embedder: Option<Arc<dyn Embedder>>,
}

pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let embedder = create_embedder(&config.embedding, config.source.retry_policy())?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("API server listening on http://{}", config.server.bind);
    axum::serve(listener, router(pool, embedder)).await?;
    Ok(())
}

pub fn router(pool: SqlitePool, embedder: Option<Arc<dyn Embedder>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/agencies", get(handle_agencies))
        .route("/api/agency-history", get(handle_agency_history))
        .route("/api/agency-word-counts", get(handle_word_counts))
        .route("/api/search", get(handle_search))
        .route("/api/status", get(handle_status))
        .layer(cors)
        .with_state(AppState { pool, embedder })
}

// ============ Errors ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

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

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!("Request failed: {:#}", err);
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: "Internal Server Error".to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_agencies(
    State(state): State<AppState>,
) -> Result<Json<Vec<query::AgencySummary>>, AppError> {
    Ok(Json(query::list_agencies(&state.pool).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    agency_id: Option<String>,
}

async fn handle_agency_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<crate::models::HistoryEntry>>, AppError> {
    Ok(Json(
        query::agency_history(&state.pool, params.agency_id.as_deref()).await?,
    ))
}

async fn handle_word_counts(
    State(state): State<AppState>,
) -> Result<Json<Vec<query::AgencyWordCount>>, AppError> {
    Ok(Json(query::agency_word_counts(&state.pool).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    query: Option<String>,
    agency_id: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<query::SearchHit>>, AppError> {
    let text = params
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| bad_request("query is required"))?;

    let Some(embedder) = state.embedder.as_ref() else {
        return Err(AppError {
            status: StatusCode::BAD_REQUEST,
            code: "embeddings_disabled",
            message: "search requires an embedding provider".to_string(),
        });
    };

    let hits = query::search(
        &state.pool,
        embedder.as_ref(),
        &text,
        params.agency_id.as_deref(),
        query::SEARCH_LIMIT,
    )
    .await?;
    Ok(Json(hits))
}

async fn handle_status(
    State(state): State<AppState>,
) -> Result<Json<query::StatusReport>, AppError> {
    Ok(Json(query::status(&state.pool).await?))
}
