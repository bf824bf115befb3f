//! Semantic retrieval over ingested chunks
//!
//! A search runs in stages:
//! - Embed the query and consult the semantic cache
//! - Score every candidate chunk by cosine similarity
//! - Apply lexical boosts (`rerank`)
//! - Diversify the final selection with MMR (`mmr`)
//! - Attach snippets and highlights (`highlight`)

mod highlight;
mod mmr;
mod rerank;
mod semantic;

pub use highlight::{highlights, snippet};
pub use mmr::select_mmr;
pub use rerank::{query_terms, Reranker};
pub use semantic::SemanticSearch;

use folio_common::config::RetrievalConfig;
use folio_common::errors::Result;
use folio_common::models::SearchResult;
use serde::{Deserialize, Serialize};

/// Search request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text
    pub text: String,

    /// Restrict the search to one document; `None` searches every chunk
    pub document_id: Option<String>,

    /// Maximum results to return
    pub top_k: usize,

    /// Minimum raw cosine similarity a candidate must reach
    pub min_similarity: f32,

    /// Apply lexical boosts before diversification
    pub rerank: bool,

    /// MMR trade-off: 1.0 is pure relevance, 0.0 pure diversity
    pub mmr_lambda: f32,

    /// Skip the semantic cache for both lookup and store
    #[serde(default)]
    pub bypass_cache: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            document_id: None,
            top_k: 5,
            min_similarity: 0.5,
            rerank: true,
            mmr_lambda: 0.7,
            bypass_cache: false,
        }
    }
}

/// Search response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,

    /// Selected results, best score first
    pub results: Vec<SearchResult>,

    /// Number of results returned
    pub total_results: usize,

    /// Wall-clock search time in milliseconds
    pub search_time_ms: u64,

    /// Embedding model, suffixed with "(cached)" on a cache hit
    pub model: String,
}

/// Engine tuning that does not vary per request
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub phrase_boost: f32,
    pub all_terms_boost: f32,
    pub snippet_chars: usize,
    pub max_highlights: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            phrase_boost: 0.2,
            all_terms_boost: 0.1,
            snippet_chars: 200,
            max_highlights: 3,
        }
    }
}

impl From<&RetrievalConfig> for SearchConfig {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            phrase_boost: config.phrase_boost,
            all_terms_boost: config.all_terms_boost,
            snippet_chars: config.snippet_chars,
            max_highlights: config.max_highlights,
        }
    }
}

/// Common trait for retrievers
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve chunks matching the request
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;
}
