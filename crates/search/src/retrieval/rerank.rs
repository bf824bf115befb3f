//! Lexical re-ranking
//!
//! Vector similarity misses exact wording. Chunks that quote the query
//! verbatim, or at least mention every query word, get a fixed boost.

use folio_common::models::SearchResult;

/// Applies phrase and term boosts to search results
#[derive(Debug, Clone, Copy)]
pub struct Reranker {
    pub phrase_boost: f32,
    pub all_terms_boost: f32,
}

impl Default for Reranker {
    fn default() -> Self {
        Self {
            phrase_boost: 0.2,
            all_terms_boost: 0.1,
        }
    }
}

impl Reranker {
    pub fn new(phrase_boost: f32, all_terms_boost: f32) -> Self {
        Self {
            phrase_boost,
            all_terms_boost,
        }
    }

    /// Boost for one chunk text
    pub fn boost(&self, query: &str, text: &str) -> f32 {
        let phrase = query.trim().to_lowercase();
        if phrase.is_empty() {
            return 0.0;
        }
        let text = text.to_lowercase();

        let mut boost = 0.0;
        if text.contains(&phrase) {
            boost += self.phrase_boost;
        }

        let terms = query_terms(&phrase);
        if !terms.is_empty() && terms.iter().all(|term| text.contains(term.as_str())) {
            boost += self.all_terms_boost;
        }
        boost
    }

    /// Boost every result's score and re-sort, best first
    pub fn apply(&self, query: &str, results: &mut [SearchResult]) {
        for result in results.iter_mut() {
            result.score = result.similarity + self.boost(query, &result.chunk.text);
        }
        sort_by_score(results);
    }
}

/// Lowercased query words with surrounding punctuation removed
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Sort descending by score
pub(crate) fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
}
