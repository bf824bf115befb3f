//! Semantic query cache
//!
//! Provides:
//! - Per-document buckets of recent query embeddings and their results
//! - Approximate lookup by query-embedding similarity
//! - In-place overwrite of near-identical queries
//! - Capacity eviction by oldest timestamp
//! - Lazy expiry with an explicit sweep
//!
//! The cache lives for the process lifetime and is never persisted.

use crate::metrics;
use crate::models::SearchResult;
use crate::similarity::cosine_similarity;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Semantic cache configuration
#[derive(Debug, Clone)]
pub struct SemanticCacheConfig {
    /// Minimum similarity for `find_similar` to report a hit
    pub similarity_threshold: f32,
    /// Similarity above which `store` overwrites an existing entry
    pub duplicate_threshold: f32,
    /// Entries kept per document before eviction
    pub max_entries_per_document: usize,
    /// Age after which an entry is ignored
    pub ttl: Duration,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.95,
            duplicate_threshold: 0.99,
            max_entries_per_document: 50,
            ttl: Duration::hours(24),
        }
    }
}

impl From<&crate::config::CacheSettings> for SemanticCacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            similarity_threshold: settings.similarity_threshold,
            duplicate_threshold: settings.duplicate_threshold,
            max_entries_per_document: settings.max_entries_per_document,
            ttl: Duration::hours(settings.ttl_hours),
        }
    }
}

/// One cached query and its result set
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub query: String,
    pub embedding: Vec<f32>,
    pub document_id: String,
    pub results: Vec<SearchResult>,
    pub timestamp: DateTime<Utc>,
    pub hits: u64,
}

/// Result of a successful lookup
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub results: Vec<SearchResult>,
    pub similarity: f32,
    pub query: String,
}

/// Cache counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub total_entries: usize,
}

type Bucket = Arc<Mutex<Vec<CacheEntry>>>;

/// In-memory semantic cache keyed by document id
pub struct SemanticCache {
    buckets: RwLock<HashMap<String, Bucket>>,
    config: SemanticCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SemanticCache {
    /// Create an empty cache
    pub fn new(config: SemanticCacheConfig) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    async fn bucket(&self, document_id: &str) -> Option<Bucket> {
        self.buckets.read().await.get(document_id).cloned()
    }

    async fn bucket_or_insert(&self, document_id: &str) -> Bucket {
        if let Some(bucket) = self.bucket(document_id).await {
            return bucket;
        }
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.timestamp > self.config.ttl
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache(false, "semantic");
    }

    /// Best non-expired entry for `document_id` at or above the similarity threshold
    pub async fn find_similar(&self, query_embedding: &[f32], document_id: &str) -> Option<CacheHit> {
        let Some(bucket) = self.bucket(document_id).await else {
            self.record_miss();
            return None;
        };

        let now = Utc::now();
        let mut entries = bucket.lock().await;
        let mut best: Option<(usize, f32)> = None;

        for (idx, entry) in entries.iter().enumerate() {
            if self.is_expired(entry, now) {
                continue;
            }
            let similarity = match cosine_similarity(query_embedding, &entry.embedding) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, document_id, "Skipping cache entry with incompatible embedding");
                    continue;
                }
            };
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((idx, similarity));
            }
        }

        match best {
            Some((idx, similarity)) if similarity >= self.config.similarity_threshold => {
                let entry = &mut entries[idx];
                entry.hits += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache(true, "semantic");
                debug!(document_id, similarity, cached_query = %entry.query, "Semantic cache hit");
                Some(CacheHit {
                    results: entry.results.clone(),
                    similarity,
                    query: entry.query.clone(),
                })
            }
            _ => {
                self.record_miss();
                debug!(document_id, "Semantic cache miss");
                None
            }
        }
    }

    /// Cache `results` for a query, replacing a near-identical query if present
    pub async fn store(
        &self,
        query: &str,
        embedding: Vec<f32>,
        document_id: &str,
        results: Vec<SearchResult>,
    ) {
        let bucket = self.bucket_or_insert(document_id).await;
        let mut entries = bucket.lock().await;
        let now = Utc::now();

        let duplicate = entries.iter().position(|entry| {
            cosine_similarity(&embedding, &entry.embedding)
                .map(|s| s > self.config.duplicate_threshold)
                .unwrap_or(false)
        });

        if let Some(idx) = duplicate {
            let entry = &mut entries[idx];
            entry.query = query.to_string();
            entry.embedding = embedding;
            entry.results = results;
            entry.timestamp = now;
            debug!(document_id, query, "Semantic cache entry refreshed");
            return;
        }

        entries.push(CacheEntry {
            query: query.to_string(),
            embedding,
            document_id: document_id.to_string(),
            results,
            timestamp: now,
            hits: 0,
        });

        if entries.len() > self.config.max_entries_per_document {
            if let Some(oldest) = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, entry)| entry.timestamp)
                .map(|(idx, _)| idx)
            {
                let evicted = entries.remove(oldest);
                debug!(document_id, query = %evicted.query, "Semantic cache evicted oldest entry");
            }
        }
    }

    /// Drop every entry for one document
    pub async fn clear_document(&self, document_id: &str) {
        self.buckets.write().await.remove(document_id);
    }

    /// Drop every entry and reset counters
    pub async fn clear_all(&self) {
        self.buckets.write().await.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn clean_expired(&self) -> usize {
        let now = Utc::now();
        let buckets: Vec<Bucket> = self.buckets.read().await.values().cloned().collect();
        let mut removed = 0;

        for bucket in buckets {
            let mut entries = bucket.lock().await;
            let before = entries.len();
            entries.retain(|entry| !self.is_expired(entry, now));
            removed += before - entries.len();
        }

        if removed > 0 {
            debug!(removed, "Semantic cache expired entries removed");
        }
        removed
    }

    /// Entry count for one document
    pub async fn document_len(&self, document_id: &str) -> usize {
        match self.bucket(document_id).await {
            Some(bucket) => bucket.lock().await.len(),
            None => 0,
        }
    }

    /// Snapshot of the entries for one document
    pub async fn entries(&self, document_id: &str) -> Vec<CacheEntry> {
        match self.bucket(document_id).await {
            Some(bucket) => bucket.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        let buckets: Vec<Bucket> = self.buckets.read().await.values().cloned().collect();
        let mut total_entries = 0;
        for bucket in buckets {
            total_entries += bucket.lock().await.len();
        }

        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            total_entries,
        }
    }
}

impl Default for SemanticCache {
    fn default() -> Self {
        Self::new(SemanticCacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn one_hot(dim: usize, idx: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[idx] = 1.0;
        v
    }

    fn result(id: &str) -> SearchResult {
        SearchResult {
            chunk: Chunk::new(id, "doc-1", "cached text", 1, vec![1.0, 0.0]),
            similarity: 0.8,
            score: 0.8,
            snippet: "cached text".into(),
            highlights: vec![],
        }
    }

    #[tokio::test]
    async fn test_store_then_find_identical() {
        let cache = SemanticCache::default();
        let embedding = vec![0.2, 0.4, 0.6];
        cache.store("what is the fee?", embedding.clone(), "doc-1", vec![result("c1")]).await;

        let hit = cache.find_similar(&embedding, "doc-1").await.unwrap();
        assert!((hit.similarity - 1.0).abs() < 1e-6);
        assert_eq!(hit.results.len(), 1);
        assert_eq!(hit.query, "what is the fee?");
    }

    #[tokio::test]
    async fn test_other_document_misses() {
        let cache = SemanticCache::default();
        let embedding = vec![0.2, 0.4, 0.6];
        cache.store("q", embedding.clone(), "doc-1", vec![result("c1")]).await;

        assert!(cache.find_similar(&embedding, "doc-2").await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test]
    async fn test_below_threshold_misses() {
        let cache = SemanticCache::default();
        cache.store("q", vec![1.0, 0.0], "doc-1", vec![result("c1")]).await;

        // cos(45deg) ~ 0.707
        assert!(cache.find_similar(&[1.0, 1.0], "doc-1").await.is_none());
    }

    #[tokio::test]
    async fn test_eviction_drops_oldest() {
        let cache = SemanticCache::default();
        for i in 0..51 {
            cache
                .store(&format!("query {}", i), one_hot(64, i), "doc-1", vec![result("c")])
                .await;
        }

        assert_eq!(cache.document_len("doc-1").await, 50);
        let entries = cache.entries("doc-1").await;
        assert!(entries.iter().all(|e| e.query != "query 0"));
        assert!(entries.iter().any(|e| e.query == "query 50"));
    }

    #[tokio::test]
    async fn test_near_duplicate_overwrites_and_keeps_hits() {
        let cache = SemanticCache::default();
        let embedding = vec![1.0, 0.0, 0.0];
        cache.store("first", embedding.clone(), "doc-1", vec![result("c1")]).await;
        cache.find_similar(&embedding, "doc-1").await.unwrap();

        cache
            .store("second", vec![1.0, 0.001, 0.0], "doc-1", vec![result("c2"), result("c3")])
            .await;

        let entries = cache.entries("doc-1").await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].query, "second");
        assert_eq!(entries[0].results.len(), 2);
        assert_eq!(entries[0].hits, 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_skipped_then_cleaned() {
        let cache = SemanticCache::new(SemanticCacheConfig {
            ttl: Duration::milliseconds(-1),
            ..SemanticCacheConfig::default()
        });
        let embedding = vec![0.5, 0.5];
        cache.store("q", embedding.clone(), "doc-1", vec![result("c1")]).await;

        assert!(cache.find_similar(&embedding, "doc-1").await.is_none());
        assert_eq!(cache.document_len("doc-1").await, 1);
        assert_eq!(cache.clean_expired().await, 1);
        assert_eq!(cache.document_len("doc-1").await, 0);
    }

    #[tokio::test]
    async fn test_clear_and_stats() {
        let cache = SemanticCache::default();
        cache.store("a", vec![1.0, 0.0], "doc-1", vec![]).await;
        cache.store("b", vec![0.0, 1.0], "doc-2", vec![]).await;
        cache.find_similar(&[1.0, 0.0], "doc-1").await.unwrap();
        cache.find_similar(&[1.0, 0.0], "doc-3").await;

        let stats = cache.stats().await;
        assert_eq!(stats.total_entries, 2);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);

        cache.clear_document("doc-1").await;
        assert_eq!(cache.stats().await.total_entries, 1);

        cache.clear_all().await;
        let stats = cache.stats().await;
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.hits, 0);
    }
}
