//! HTTP query endpoint built on axum.
//!
//! - `POST /query` `{question, top_k?}` -> `{answer, retrieved}`
//! - `GET /health` index size
//! - `GET /` service banner

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{IndexError, QueryError, RagError};
use crate::index::VectorIndex;
use crate::query::{QueryEngine, QueryResponse};

/// State shared by all handlers.
#[derive(Debug)]
pub struct AppState {
    pub index: VectorIndex,
    pub engine: QueryEngine,
}

/// Thread-safe shared state reference for axum handlers.
pub type SharedState = Arc<AppState>;

/// Body of `POST /query`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryRequest {
    pub question: String,
    /// Defaults to the configured `query.top_k`.
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Structured error body: a stable `error` code and a diagnostic `detail`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

struct ApiError(QueryError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            QueryError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, "invalid_input"),
            QueryError::Embedding(_) => (StatusCode::INTERNAL_SERVER_ERROR, "embedding_failed"),
            QueryError::Generation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "generation_failed"),
            QueryError::Index(_) => (StatusCode::INTERNAL_SERVER_ERROR, "index_error"),
        };
        let body = ErrorBody {
            error: code.to_string(),
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build an axum Router with the query, health and banner routes.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/query", post(query_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "message": "RAG API is running!",
        "endpoints": {
            "query": "/query (POST)",
            "health": "/health",
        },
    }))
}

async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "chunks": state.index.len(),
        "dim": state.index.dim(),
    }))
}

async fn query_handler(
    State(state): State<SharedState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let top_k = request.top_k.unwrap_or_else(|| state.engine.default_top_k());
    info!(question = %request.question, top_k, "Received question");
    match state
        .engine
        .answer(&state.index, &request.question, top_k)
        .await
    {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            warn!(error = %e, "Query failed");
            Err(ApiError(e))
        }
    }
}

/// Load the persisted index into `index`, failing if it does not exist.
pub fn require_index(index: &mut VectorIndex) -> Result<(), IndexError> {
    if !index.load()? {
        return Err(IndexError::NotFound {
            path: index.paths().index.clone(),
        });
    }
    Ok(())
}

/// Load the index and serve until `shutdown` is cancelled.
///
/// Refuses to start when no persisted index exists.
pub async fn serve(
    mut index: VectorIndex,
    engine: QueryEngine,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> Result<(), RagError> {
    require_index(&mut index)?;
    info!(chunks = index.len(), "Index loaded");

    let app = router(Arc::new(AppState { index, engine }));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Query endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
