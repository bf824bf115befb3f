//! Semantic cache maintenance handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use folio_common::cache::CacheStats;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct CleanResponse {
    pub removed: usize,
}

/// Hit/miss counters and entry count
pub async fn stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

pub async fn clear_all(State(state): State<AppState>) -> StatusCode {
    state.cache.clear_all().await;
    tracing::info!("Semantic cache cleared");
    StatusCode::NO_CONTENT
}

/// Drop the cached queries of one document, e.g. after it is re-ingested
pub async fn clear_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> StatusCode {
    state.cache.clear_document(&document_id).await;
    tracing::info!(document_id = %document_id, "Document cache cleared");
    StatusCode::NO_CONTENT
}

pub async fn clean_expired(State(state): State<AppState>) -> Json<CleanResponse> {
    let removed = state.cache.clean_expired().await;
    tracing::debug!(removed, "Expired cache entries swept");
    Json(CleanResponse { removed })
}
