//! Health check handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use folio_common::store::ChunkStore;
use serde::Serialize;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub ollama: CheckResult,
    pub store: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: folio_common::VERSION.to_string(),
    })
}

/// Readiness probe - Ollama reachable with the chat model installed
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let start = std::time::Instant::now();
    let status = state.ollama.status().await;
    let chat_model = &state.config.ollama.chat_model;

    let ollama_check = if !status.running {
        CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            models: None,
            documents: None,
            error: Some(format!("Ollama not reachable at {}", state.config.ollama.base_url)),
        }
    } else {
        let installed = status.models.iter().any(|m| m == chat_model);
        CheckResult {
            status: if installed { "up" } else { "degraded" }.to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: (!installed).then(|| format!("Model {} is not installed", chat_model)),
            models: Some(status.models),
            documents: None,
        }
    };

    let store_check = match state.store.document_ids().await {
        Ok(ids) => CheckResult {
            status: "up".to_string(),
            latency_ms: None,
            models: None,
            documents: Some(ids.len()),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            models: None,
            documents: None,
            error: Some(e.to_string()),
        },
    };

    let all_healthy = ollama_check.status == "up" && store_check.status == "up";

    Json(ReadyResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        checks: HealthChecks {
            ollama: ollama_check,
            store: store_check,
        },
    })
}

/// Prometheus scrape endpoint
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}
