//! Maximal Marginal Relevance selection
//!
//! Overlapping chunk windows often rank side by side. MMR trades a little
//! relevance for coverage:
//!
//! `mmr = lambda * relevance - (1 - lambda) * max_sim(candidate, selected)`
//!
//! Relevance is the (possibly boosted) result score; redundancy is the cosine
//! similarity between chunk embeddings.

use folio_common::errors::Result;
use folio_common::models::SearchResult;
use folio_common::similarity::cosine_similarity;

/// Select up to `top_k` results from `candidates`, which must be sorted best first
///
/// Candidates without an embedding are treated as having no redundancy.
/// The returned list is in selection order.
pub fn select_mmr(
    mut candidates: Vec<SearchResult>,
    top_k: usize,
    lambda: f32,
) -> Result<Vec<SearchResult>> {
    if top_k == 0 || candidates.is_empty() {
        return Ok(Vec::new());
    }

    let mut selected = Vec::with_capacity(top_k.min(candidates.len()));
    selected.push(candidates.remove(0));

    while selected.len() < top_k && !candidates.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (idx, candidate) in candidates.iter().enumerate() {
            let redundancy = max_similarity(candidate, &selected)?;
            let score = lambda * candidate.score - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_idx = idx;
            }
        }

        selected.push(candidates.remove(best_idx));
    }

    Ok(selected)
}

fn max_similarity(candidate: &SearchResult, selected: &[SearchResult]) -> Result<f32> {
    let Some(embedding) = candidate.embedding() else {
        return Ok(0.0);
    };

    let mut max = f32::NEG_INFINITY;
    for other in selected {
        if let Some(other_embedding) = other.embedding() {
            max = max.max(cosine_similarity(embedding, other_embedding)?);
        }
    }
    Ok(if max.is_finite() { max } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_common::errors::AppError;
    use folio_common::models::Chunk;

    fn candidate(id: &str, score: f32, embedding: Vec<f32>) -> SearchResult {
        SearchResult {
            chunk: Chunk::new(id, "doc", id, 1, embedding),
            similarity: score,
            score,
            snippet: String::new(),
            highlights: vec![],
        }
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk.id.as_str()).collect()
    }

    #[test]
    fn test_near_duplicates_are_not_both_selected() {
        let candidates = vec![
            candidate("a", 0.92, vec![1.0, 0.0, 0.0]),
            candidate("a-overlap", 0.91, vec![0.999, 0.04, 0.0]),
            candidate("b", 0.70, vec![0.0, 1.0, 0.0]),
        ];

        let selected = select_mmr(candidates, 2, 0.5).unwrap();
        assert_eq!(ids(&selected), vec!["a", "b"]);
    }

    #[test]
    fn test_lambda_one_is_pure_relevance() {
        let candidates = vec![
            candidate("a", 0.92, vec![1.0, 0.0]),
            candidate("a-overlap", 0.91, vec![1.0, 0.0]),
            candidate("b", 0.70, vec![0.0, 1.0]),
        ];

        let selected = select_mmr(candidates, 2, 1.0).unwrap();
        assert_eq!(ids(&selected), vec!["a", "a-overlap"]);
    }

    #[test]
    fn test_top_k_larger_than_candidates() {
        let candidates = vec![
            candidate("a", 0.9, vec![1.0, 0.0]),
            candidate("b", 0.8, vec![0.0, 1.0]),
        ];

        assert_eq!(select_mmr(candidates, 10, 0.7).unwrap().len(), 2);
        assert!(select_mmr(vec![], 3, 0.7).unwrap().is_empty());
    }

    #[test]
    fn test_mismatched_embeddings_raise() {
        let candidates = vec![
            candidate("a", 0.9, vec![1.0, 0.0]),
            candidate("b", 0.8, vec![0.0, 1.0, 0.0]),
        ];

        let err = select_mmr(candidates, 2, 0.7).unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { .. }));
    }
}
