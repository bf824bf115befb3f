//! Folio Gateway
//!
//! HTTP surface over the adaptive RAG pipeline.
//! Handles:
//! - Streaming answers as server-sent events
//! - Session stop requests
//! - Semantic cache maintenance
//! - Observability (logging, metrics, health)

mod handlers;
mod middleware;

use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    routing::{delete, get, post},
    BoxError, Router,
};
use folio_common::{
    cache::{SemanticCache, SemanticCacheConfig},
    config::AppConfig,
    llm::OllamaClient,
    metrics,
    store::{ChunkStore, InMemoryChunkStore},
};
use folio_context::{ChatSession, OrchestratorConfig, RagPipeline};
use folio_search::{SearchConfig, SemanticSearch};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::collections::HashMap;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{watch, RwLock};
use tower::{limit::GlobalConcurrencyLimitLayer, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<RagPipeline>,
    pub cache: Arc<SemanticCache>,
    pub store: Arc<InMemoryChunkStore>,
    pub ollama: Arc<OllamaClient>,
    pub sessions: Arc<RwLock<HashMap<Uuid, Arc<ChatSession>>>>,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire the pipeline over a store, using Ollama for embeddings and chat
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<InMemoryChunkStore>,
        ollama: Arc<OllamaClient>,
        prometheus: Option<PrometheusHandle>,
    ) -> folio_common::Result<Self> {
        let cache = Arc::new(SemanticCache::new(SemanticCacheConfig::from(&config.cache)));
        let search = SemanticSearch::new(
            ollama.clone(),
            store.clone(),
            cache.clone(),
            SearchConfig::from(&config.retrieval),
        );
        let pipeline = RagPipeline::new(
            Arc::new(search),
            ollama.clone(),
            OrchestratorConfig::from(config.as_ref()),
        )?;

        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
            cache,
            store,
            ollama,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            prometheus,
        })
    }

    /// Existing session for `id`, or a new one registered under it
    ///
    /// Without an id the session is private to one request and never
    /// enters the registry.
    pub async fn session(&self, id: Option<Uuid>) -> Arc<ChatSession> {
        let Some(id) = id else {
            return Arc::new(ChatSession::new(self.pipeline.clone()));
        };
        if let Some(session) = self.sessions.read().await.get(&id) {
            return session.clone();
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id)
            .or_insert_with(|| {
                info!(session_id = %id, "Session created");
                Arc::new(ChatSession::with_id(id, self.pipeline.clone()))
            })
            .clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    init_tracing(&config);

    info!(service = %config.observability.service_name, "Starting Folio Gateway v{}", folio_common::VERSION);

    // Initialize metrics
    let prometheus = if config.observability.metrics_enabled {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("search_duration_seconds".to_string()),
                metrics::LATENCY_BUCKETS,
            )?
            .set_buckets_for_metric(
                Matcher::Suffix("generation_duration_seconds".to_string()),
                metrics::GENERATION_BUCKETS,
            )?
            .install_recorder()?;
        metrics::register_metrics();
        Some(handle)
    } else {
        None
    };

    // Load pre-embedded chunks
    let store = match &config.store.chunks_path {
        Some(path) => {
            let store = InMemoryChunkStore::from_json_file(path).await?;
            info!(path = %path, documents = store.document_ids().await?.len(), "Chunk store loaded");
            store
        }
        None => {
            warn!("No chunk store configured, document queries will run without context");
            InMemoryChunkStore::new()
        }
    };

    let ollama = Arc::new(OllamaClient::new(config.ollama.clone())?);
    let status = ollama.status().await;
    if status.running {
        info!(models = ?status.models, "Ollama reachable");
    } else {
        warn!(base_url = %config.ollama.base_url, "Ollama is not reachable yet");
    }

    let state = AppState::new(config.clone(), Arc::new(store), ollama, prometheus)?;

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Open answer streams get a bounded drain window after the signal
    let (stopping_tx, mut stopping_rx) = watch::channel(false);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stopping_tx.send(true);
        })
        .into_future();
    let drain_deadline = async move {
        let _ = stopping_rx.changed().await;
        tokio::time::sleep(config.shutdown_timeout()).await;
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline => warn!("Shutdown timeout elapsed, closing open streams"),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Install the tracing subscriber; `RUST_LOG` wins over the configured level
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let rate_limit = &state.config.rate_limit;
    let mut query_routes =
        Router::new().route("/query", post(handlers::query::query));
    if rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            rate_limit.requests_per_second,
            rate_limit.burst,
        );
        query_routes = query_routes.layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    // Non-streaming routes answer within the request timeout
    let timeout = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(handle_timeout))
        .timeout(state.config.request_timeout());

    // API routes
    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Session endpoints
        .route("/sessions/{id}/stop", post(handlers::sessions::stop_session))

        // Cache endpoints
        .route("/cache", delete(handlers::cache::clear_all))
        .route("/cache/stats", get(handlers::cache::stats))
        .route("/cache/clean", post(handlers::cache::clean_expired))
        .route("/cache/{document_id}", delete(handlers::cache::clear_document))
        .layer(timeout)

        .merge(query_routes);

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .route("/metrics", get(handlers::health::metrics))
        .layer(axum::middleware::from_fn(middleware::metrics::track_requests))
        .layer(GlobalConcurrencyLimitLayer::new(state.config.server.max_concurrent_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

async fn handle_timeout(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "Request timed out".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Unhandled middleware error: {}", err))
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use folio_common::models::Chunk;
    use folio_common::testing::{MockChatBackend, MockEmbedder};
    use tower::ServiceExt;

    const QUERY: &str = "What is the termination clause?";

    fn test_state() -> AppState {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        config.observability.metrics_enabled = false;
        let config = Arc::new(config);

        let store = Arc::new(InMemoryChunkStore::with_chunks(vec![
            Chunk::new("c1", "contract", "Either party may terminate with notice.", 4, vec![1.0, 0.0, 0.0]),
            Chunk::new("c2", "contract", "Fees are due monthly.", 7, vec![0.0, 1.0, 0.0]),
        ]));
        let cache = Arc::new(SemanticCache::new(SemanticCacheConfig::from(&config.cache)));
        let embedder = MockEmbedder::new(3).with_vector(QUERY, vec![1.0, 0.0, 0.0]);
        let search = SemanticSearch::new(
            Arc::new(embedder),
            store.clone(),
            cache.clone(),
            SearchConfig::from(&config.retrieval),
        );
        let pipeline = RagPipeline::new(
            Arc::new(search),
            Arc::new(MockChatBackend::new()),
            OrchestratorConfig::default(),
        )
        .unwrap();

        AppState {
            ollama: Arc::new(OllamaClient::new(config.ollama.clone()).unwrap()),
            config,
            pipeline: Arc::new(pipeline),
            cache,
            store,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            prometheus: None,
        }
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("healthy"));
    }

    #[tokio::test]
    async fn test_query_streams_deltas_then_done() {
        let state = test_state();
        let app = create_router(state.clone());
        let request = json_request(
            "POST",
            "/v1/query",
            serde_json::json!({ "text": QUERY, "document_ids": ["contract"] }),
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key(handlers::query::SESSION_HEADER));

        let body = body_text(response).await;
        assert!(body.contains("event: delta"));
        let done = body.split("event: done").nth(1).unwrap();
        assert!(done.contains("\"state\":\"completed\""));
        assert!(done.contains("\"c1\""));
        assert!(state.sessions.read().await.is_empty());
        assert_eq!(state.cache.stats().await.total_entries, 1);
    }

    #[tokio::test]
    async fn test_query_with_session_id_registers_session() {
        let state = test_state();
        let app = create_router(state.clone());
        let session_id = Uuid::new_v4();
        let request = json_request(
            "POST",
            "/v1/query",
            serde_json::json!({ "text": "Hi", "session_id": session_id }),
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let header = response.headers().get(handlers::query::SESSION_HEADER).unwrap();
        assert_eq!(header.to_str().unwrap(), session_id.to_string());

        let body = body_text(response).await;
        assert!(body.contains("\"state\":\"completed\""));
        let sessions = state.sessions.read().await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions.contains_key(&session_id));
    }

    #[tokio::test]
    async fn test_anonymous_queries_leave_registry_empty() {
        let state = test_state();
        for _ in 0..3 {
            let response = create_router(state.clone())
                .oneshot(json_request("POST", "/v1/query", serde_json::json!({ "text": "Hi" })))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            body_text(response).await;
        }
        assert!(state.sessions.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_query_whitespace_text_completes_without_context() {
        let state = test_state();
        let app = create_router(state.clone());
        let request = json_request(
            "POST",
            "/v1/query",
            serde_json::json!({ "text": "   ", "document_ids": ["contract"] }),
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_text(response).await;
        let done = body.split("event: done").nth(1).unwrap();
        assert!(done.contains("\"state\":\"completed\""));
        assert!(done.contains("\"sources\":[]"));
        assert_eq!(state.cache.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_query_rejects_empty_text() {
        let app = create_router(test_state());
        let response = app
            .oneshot(json_request("POST", "/v1/query", serde_json::json!({ "text": "" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_query_rejects_too_many_documents() {
        let app = create_router(test_state());
        let ids: Vec<String> = (0..21).map(|i| format!("doc-{}", i)).collect();
        let response = app
            .oneshot(json_request(
                "POST",
                "/v1/query",
                serde_json::json!({ "text": "Summarize", "document_ids": ids }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stop_unknown_session_is_not_found() {
        let app = create_router(test_state());
        let uri = format!("/v1/sessions/{}/stop", Uuid::new_v4());
        let response = app
            .oneshot(Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stop_idle_session() {
        let state = test_state();
        let session = state.session(Some(Uuid::new_v4())).await;
        let app = create_router(state);

        let uri = format!("/v1/sessions/{}/stop", session.id());
        let response = app
            .oneshot(Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"stopped\":false"));
    }

    #[tokio::test]
    async fn test_cache_endpoints() {
        let state = test_state();
        state.cache.store("q", vec![1.0, 0.0, 0.0], "contract", Vec::new()).await;
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/v1/cache/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(body_text(response).await.contains("\"total_entries\":1"));

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/v1/cache/contract")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.cache.document_len("contract").await, 0);
    }

    #[tokio::test]
    async fn test_session_registry_reuses_ids() {
        let state = test_state();
        let id = Uuid::new_v4();
        let first = state.session(Some(id)).await;
        let again = state.session(Some(id)).await;
        assert!(Arc::ptr_eq(&first, &again));

        let anonymous = state.session(None).await;
        assert_ne!(anonymous.id(), id);
        assert_eq!(state.sessions.read().await.len(), 1);
    }
}
