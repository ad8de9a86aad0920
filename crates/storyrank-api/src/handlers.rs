//! Route handlers.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use storyrank_core::config::SearchConfig;
use storyrank_core::types::RankedItem;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Query parameter types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    /// Signed; non-positive values are rejected by [`resolve_limit`].
    pub limit: Option<i64>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<RankedItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub stored_items: u64,
}

// =============================================================================
// Handlers
// =============================================================================

/// Apply the default and the ceiling to a requested result count.
pub fn resolve_limit(requested: Option<i64>, search: &SearchConfig) -> Result<usize, ApiError> {
    match requested {
        None => Ok(search.default_limit),
        Some(n) if n <= 0 => Err(ApiError::BadRequest(format!(
            "Parameter 'limit' must be positive, got {}",
            n
        ))),
        Some(n) => Ok(usize::try_from(n).unwrap_or(usize::MAX).min(search.max_limit)),
    }
}

/// GET /search?q=...&limit=...
pub async fn search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let q = params
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Query parameter 'q' is required".to_string()))?;
    let limit = resolve_limit(params.limit, &state.config.search)?;

    let results = state.retrieval.rank(&q, limit).await?;
    Ok(Json(SearchResponse { query: q, results }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let stored_items = state.store.count().await?;
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        stored_items,
    }))
}
