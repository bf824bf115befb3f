//! Embedding-similarity search over the chunk store

use super::highlight::{highlights, snippet};
use super::mmr::select_mmr;
use super::rerank::{sort_by_score, Reranker};
use super::{Retriever, SearchConfig, SearchRequest, SearchResponse};
use folio_common::cache::SemanticCache;
use folio_common::embeddings::Embedder;
use folio_common::errors::{AppError, Result};
use folio_common::metrics;
use folio_common::models::SearchResult;
use folio_common::similarity::cosine_similarity;
use folio_common::store::ChunkStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Semantic search engine
pub struct SemanticSearch {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn ChunkStore>,
    cache: Arc<SemanticCache>,
    config: SearchConfig,
}

impl SemanticSearch {
    /// Create a new search engine
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn ChunkStore>,
        cache: Arc<SemanticCache>,
        config: SearchConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            cache,
            config,
        }
    }

    /// Shared semantic cache
    pub fn cache(&self) -> &Arc<SemanticCache> {
        &self.cache
    }

    /// Score every candidate chunk against the query embedding
    ///
    /// Chunks without an embedding are skipped. Results below
    /// `min_similarity` are dropped; the rest are sorted best first.
    fn score_candidates(
        &self,
        query: &str,
        query_embedding: &[f32],
        chunks: Vec<folio_common::models::Chunk>,
        min_similarity: f32,
    ) -> Result<Vec<SearchResult>> {
        let mut scored = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let Some(embedding) = chunk.embedding.as_deref().filter(|e| !e.is_empty()) else {
                continue;
            };
            let similarity = cosine_similarity(query_embedding, embedding)?;
            if similarity < min_similarity {
                continue;
            }

            let snippet = snippet(&chunk.text, self.config.snippet_chars);
            let highlights = highlights(&chunk.text, query, self.config.max_highlights, &snippet);
            scored.push(SearchResult {
                chunk,
                similarity,
                score: similarity,
                snippet,
                highlights,
            });
        }

        sort_by_score(&mut scored);
        Ok(scored)
    }
}

#[async_trait::async_trait]
impl Retriever for SemanticSearch {
    #[instrument(skip(self, request), fields(document_id = ?request.document_id, top_k = request.top_k))]
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        if request.text.trim().is_empty() {
            return Err(AppError::EmptyQuery);
        }

        let start = Instant::now();
        let model = self.embedder.model_name().to_string();

        let query_embedding = self
            .embedder
            .embed(&request.text)
            .await
            .map_err(|e| AppError::SearchFailed {
                message: format!("Failed to embed query: {}", e),
            })?;

        let cache_scope = request.document_id.as_deref().filter(|_| !request.bypass_cache);

        if let Some(document_id) = cache_scope {
            if let Some(hit) = self.cache.find_similar(&query_embedding, document_id).await {
                debug!(
                    similarity = hit.similarity,
                    cached_query = %hit.query,
                    "Serving search from semantic cache"
                );
                let elapsed = start.elapsed();
                metrics::record_search(elapsed.as_secs_f64(), "cache", hit.results.len());
                return Ok(SearchResponse {
                    query: request.text.clone(),
                    total_results: hit.results.len(),
                    results: hit.results,
                    search_time_ms: elapsed.as_millis() as u64,
                    model: format!("{} (cached)", model),
                });
            }
        }

        let chunks = match request.document_id.as_deref() {
            Some(document_id) => self.store.chunks_for_document(document_id).await?,
            None => self.store.all_chunks().await?,
        };
        let candidate_count = chunks.len();

        let mut candidates =
            self.score_candidates(&request.text, &query_embedding, chunks, request.min_similarity)?;

        if request.rerank {
            Reranker::new(self.config.phrase_boost, self.config.all_terms_boost)
                .apply(&request.text, &mut candidates);
        }

        let mut results = select_mmr(candidates, request.top_k, request.mmr_lambda)?;
        sort_by_score(&mut results);

        if let Some(document_id) = cache_scope {
            self.cache
                .store(&request.text, query_embedding, document_id, results.clone())
                .await;
        }

        let elapsed = start.elapsed();
        metrics::record_search(elapsed.as_secs_f64(), "vector", results.len());
        info!(
            candidates = candidate_count,
            results = results.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Semantic search completed"
        );

        Ok(SearchResponse {
            query: request.text.clone(),
            total_results: results.len(),
            results,
            search_time_ms: elapsed.as_millis() as u64,
            model,
        })
    }
}
