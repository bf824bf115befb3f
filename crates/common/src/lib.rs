//! Folio Common Library
//!
//! Shared code for the Folio adaptive RAG workspace including:
//! - Chunk and search result models
//! - Embedding and chat-completion backend abstractions (Ollama)
//! - Chunk store contract
//! - Cosine similarity and the per-document semantic cache
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod similarity;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-export commonly used types
pub use cache::{SemanticCache, SemanticCacheConfig, CacheHit, CacheStats};
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::{ChatBackend, ChatOptions, Message, Role, TokenStream};
pub use models::{Chunk, SearchResult};
pub use similarity::cosine_similarity;
pub use store::{ChunkStore, InMemoryChunkStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model served by the local Ollama instance
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Default chat model
pub const DEFAULT_CHAT_MODEL: &str = "gemma3:1b-it-q4_K_M";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
