//! Retrieval strategy selection

use crate::classifier::{QueryType, RetrievalMode};
use serde::{Deserialize, Serialize};

/// Largest `top_k` after the multi-step widening
pub const MULTI_STEP_TOP_K_CAP: usize = 20;

/// Largest generation budget after the multi-step widening
pub const MULTI_STEP_MAX_TOKENS_CAP: u32 = 16384;

/// Retrieval and generation parameters for one message
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalStrategy {
    pub mode: RetrievalMode,
    pub top_k: usize,
    pub min_similarity: f32,
    pub mmr_lambda: f32,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Bounds for loosening a strategy after a failed retrieval grade
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaxPolicy {
    pub similarity_step: f32,
    pub similarity_floor: f32,
    pub top_k_step: usize,
    pub top_k_cap: usize,
}

impl Default for RelaxPolicy {
    fn default() -> Self {
        Self {
            similarity_step: 0.1,
            similarity_floor: 0.25,
            top_k_step: 5,
            top_k_cap: 25,
        }
    }
}

impl RetrievalStrategy {
    /// Base strategy for `query_type`, widened for multi-step retrieval
    pub fn select(query_type: QueryType, mode: RetrievalMode) -> Self {
        // (top_k, min_similarity, mmr_lambda, temperature, max_tokens)
        let (top_k, min_similarity, mmr_lambda, temperature, max_tokens) = match query_type {
            QueryType::Factual => (5, 0.5, 0.8, 0.1, 4096),
            QueryType::Analytical => (8, 0.4, 0.6, 0.3, 6144),
            QueryType::Exploratory => (10, 0.35, 0.5, 0.5, 8192),
            QueryType::Conversational => (4, 0.45, 0.7, 0.7, 2048),
        };

        let mut strategy = Self {
            mode,
            top_k,
            min_similarity,
            mmr_lambda,
            temperature,
            max_tokens,
        };

        if mode == RetrievalMode::MultiStep {
            strategy.top_k = (strategy.top_k + 5).min(MULTI_STEP_TOP_K_CAP);
            strategy.max_tokens =
                ((strategy.max_tokens as f32 * 1.5) as u32).min(MULTI_STEP_MAX_TOKENS_CAP);
        }

        strategy
    }

    /// Loosen thresholds for another retrieval attempt
    pub fn relax(&mut self, policy: &RelaxPolicy) {
        self.min_similarity = (self.min_similarity - policy.similarity_step).max(policy.similarity_floor);
        self.top_k = (self.top_k + policy.top_k_step).min(policy.top_k_cap);
    }
}
