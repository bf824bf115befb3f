//! Configuration management for Folio
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Local inference backend (Ollama)
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Retrieval tuning
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Semantic cache
    #[serde(default)]
    pub cache: CacheSettings,

    /// Generation orchestration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Chunk store
    #[serde(default)]
    pub store: StoreConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Timeout for non-streaming requests in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OllamaConfig {
    /// Base URL of the Ollama HTTP API
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    /// Model used for chat completion and grading
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Model used for embeddings
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Embedding dimension produced by `embedding_model`
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// Nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Context window passed as `num_ctx` on streaming calls
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,

    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,

    #[serde(default = "default_repeat_last_n")]
    pub repeat_last_n: u32,

    /// Timeout for connectivity checks in seconds
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,

    /// Timeout for non-streaming chat calls in seconds
    #[serde(default = "default_chat_timeout")]
    pub chat_timeout_secs: u64,

    /// Timeout for embedding calls in seconds
    #[serde(default = "default_embedding_timeout")]
    pub embedding_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Apply lexical boosts after vector scoring
    #[serde(default = "default_enabled")]
    pub rerank: bool,

    /// Boost when the chunk contains the exact query phrase
    #[serde(default = "default_phrase_boost")]
    pub phrase_boost: f32,

    /// Boost when the chunk contains every query word
    #[serde(default = "default_all_terms_boost")]
    pub all_terms_boost: f32,

    /// Amount `min_similarity` drops per relaxed retry
    #[serde(default = "default_relax_step")]
    pub relax_similarity_step: f32,

    /// Lowest `min_similarity` a relaxed retry may reach
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,

    /// Amount `top_k` grows per relaxed retry
    #[serde(default = "default_top_k_step")]
    pub top_k_step: usize,

    /// Largest `top_k` a relaxed retry may reach
    #[serde(default = "default_relaxed_top_k_cap")]
    pub relaxed_top_k_cap: usize,

    #[serde(default = "default_single_step_attempts")]
    pub single_step_attempts: u32,

    #[serde(default = "default_multi_step_attempts")]
    pub multi_step_attempts: u32,

    /// Characters kept in a result snippet
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,

    #[serde(default = "default_max_highlights")]
    pub max_highlights: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Minimum query similarity for a cache hit
    #[serde(default = "default_cache_threshold")]
    pub similarity_threshold: f32,

    /// Similarity above which a stored query overwrites an existing entry
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f32,

    #[serde(default = "default_cache_capacity")]
    pub max_entries_per_document: usize,

    #[serde(default = "default_cache_ttl_hours")]
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Wait between attempts while the backend reports a loading model
    #[serde(default = "default_loading_backoff_ms")]
    pub model_loading_backoff_ms: u64,

    #[serde(default = "default_loading_attempts")]
    pub model_loading_max_attempts: u32,

    /// Prior conversation messages folded into the prompt
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Run the post-generation graders
    #[serde(default = "default_enabled")]
    pub grade_answers: bool,

    #[serde(default = "default_grading_max_tokens")]
    pub grading_max_tokens: u32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    /// JSON file holding pre-embedded chunks
    pub chunks_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Expose Prometheus metrics at /metrics
    #[serde(default = "default_enabled")]
    pub metrics_enabled: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second for the query endpoint
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_concurrent() -> usize { 64 }
fn default_ollama_url() -> String { "http://127.0.0.1:11434".to_string() }
fn default_chat_model() -> String { crate::DEFAULT_CHAT_MODEL.to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_top_p() -> f32 { 0.9 }
fn default_num_ctx() -> u32 { 16384 }
fn default_repeat_penalty() -> f32 { 1.1 }
fn default_repeat_last_n() -> u32 { 64 }
fn default_ping_timeout() -> u64 { 15 }
fn default_chat_timeout() -> u64 { 120 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_phrase_boost() -> f32 { 0.2 }
fn default_all_terms_boost() -> f32 { 0.1 }
fn default_relax_step() -> f32 { 0.1 }
fn default_similarity_floor() -> f32 { 0.25 }
fn default_top_k_step() -> usize { 5 }
fn default_relaxed_top_k_cap() -> usize { 25 }
fn default_single_step_attempts() -> u32 { 1 }
fn default_multi_step_attempts() -> u32 { 3 }
fn default_snippet_chars() -> usize { 200 }
fn default_max_highlights() -> usize { 3 }
fn default_cache_threshold() -> f32 { 0.95 }
fn default_duplicate_threshold() -> f32 { 0.99 }
fn default_cache_capacity() -> usize { 50 }
fn default_cache_ttl_hours() -> i64 { 24 }
fn default_loading_backoff_ms() -> u64 { 2000 }
fn default_loading_attempts() -> u32 { 5 }
fn default_history_window() -> usize { 6 }
fn default_grading_max_tokens() -> u32 { 10 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { false }
fn default_service_name() -> String { "folio".to_string() }
fn default_rate_limit() -> u32 { 10 }
fn default_burst() -> u32 { 20 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_dimension: default_embedding_dimension(),
            top_p: default_top_p(),
            num_ctx: default_num_ctx(),
            repeat_penalty: default_repeat_penalty(),
            repeat_last_n: default_repeat_last_n(),
            ping_timeout_secs: default_ping_timeout(),
            chat_timeout_secs: default_chat_timeout(),
            embedding_timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rerank: default_enabled(),
            phrase_boost: default_phrase_boost(),
            all_terms_boost: default_all_terms_boost(),
            relax_similarity_step: default_relax_step(),
            similarity_floor: default_similarity_floor(),
            top_k_step: default_top_k_step(),
            relaxed_top_k_cap: default_relaxed_top_k_cap(),
            single_step_attempts: default_single_step_attempts(),
            multi_step_attempts: default_multi_step_attempts(),
            snippet_chars: default_snippet_chars(),
            max_highlights: default_max_highlights(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: default_cache_threshold(),
            duplicate_threshold: default_duplicate_threshold(),
            max_entries_per_document: default_cache_capacity(),
            ttl_hours: default_cache_ttl_hours(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model_loading_backoff_ms: default_loading_backoff_ms(),
            model_loading_max_attempts: default_loading_attempts(),
            history_window: default_history_window(),
            grade_answers: default_enabled(),
            grading_max_tokens: default_grading_max_tokens(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_enabled: default_enabled(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__OLLAMA__CHAT_MODEL=llama3
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the model-loading backoff as Duration
    pub fn model_loading_backoff(&self) -> Duration {
        Duration::from_millis(self.generation.model_loading_backoff_ms)
    }
}
