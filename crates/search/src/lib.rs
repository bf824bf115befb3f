//! Folio Search
//!
//! Semantic retrieval over ingested chunks:
//! - Cosine scoring of chunk embeddings against the query
//! - Exact-phrase and all-terms re-ranking
//! - Maximal Marginal Relevance diversification
//! - Per-document semantic query cache

pub mod retrieval;

pub use retrieval::{
    Retriever, SearchConfig, SearchRequest, SearchResponse, SemanticSearch,
};
