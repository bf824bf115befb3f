//! Query Classifier - Decides how much retrieval a message needs
//!
//! Provides:
//! - Query type detection (factual, analytical, exploratory, conversational)
//! - Complexity estimation
//! - Retrieval mode selection, with documents-selected override
//!
//! Classification is rule-based and deterministic: the same text and flag
//! always produce the same result.

use folio_common::errors::{AppError, Result};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Query type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Looking for a specific fact
    Factual,
    /// Reasoning over causes, comparisons, impact
    Analytical,
    /// Seeking a broad explanation or overview
    Exploratory,
    /// Small talk, greetings, arithmetic
    Conversational,
}

impl QueryType {
    pub const ALL: [QueryType; 4] = [
        QueryType::Factual,
        QueryType::Analytical,
        QueryType::Exploratory,
        QueryType::Conversational,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Factual => "factual",
            QueryType::Analytical => "analytical",
            QueryType::Exploratory => "exploratory",
            QueryType::Conversational => "conversational",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            QueryType::Factual => "Factual question seeking specific information",
            QueryType::Analytical => "Analytical question requiring reasoning across sources",
            QueryType::Exploratory => "Exploratory request for a broad explanation",
            QueryType::Conversational => "Conversational message",
        }
    }
}

/// Query complexity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        }
    }
}

/// How retrieval runs for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Answer from the model alone
    NoRetrieval,
    /// One graded retrieval pass
    SingleStep,
    /// Up to several passes, relaxing thresholds after each failed grade
    MultiStep,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::NoRetrieval => "no_retrieval",
            RetrievalMode::SingleStep => "single_step",
            RetrievalMode::MultiStep => "multi_step",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            RetrievalMode::NoRetrieval => "answering without document retrieval",
            RetrievalMode::SingleStep => "using a single retrieval pass",
            RetrievalMode::MultiStep => "using iterative retrieval with relaxed thresholds on retry",
        }
    }
}

impl From<Complexity> for RetrievalMode {
    fn from(complexity: Complexity) -> Self {
        match complexity {
            Complexity::Simple => RetrievalMode::NoRetrieval,
            Complexity::Moderate => RetrievalMode::SingleStep,
            Complexity::Complex => RetrievalMode::MultiStep,
        }
    }
}

/// Classification result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryClassification {
    #[serde(rename = "type")]
    pub query_type: QueryType,

    pub complexity: Complexity,

    pub retrieval_mode: RetrievalMode,

    /// Winner's share of all pattern matches (0.0 - 1.0)
    pub confidence: f32,

    /// Human-readable explanation
    pub reasoning: String,
}

/// Compiled signal patterns
struct PatternSet {
    query_type: QueryType,
    patterns: Vec<Regex>,
}

/// Rule-based query classifier
pub struct QueryClassifier {
    signals: Vec<PatternSet>,
    greeting: Regex,
    arithmetic: Regex,
    single_term: Regex,
    comparison: Regex,
    connectors: Regex,
}

const FACTUAL: &[&str] = &[
    r"^(what|who|when|where|which)\b",
    r"\b(define|definition of|meaning of)\b",
    r"\bhow (many|much|long|old|often)\b",
    r"\b(is|are|was|were) there\b",
    r"\b(date|deadline|amount|number of|percentage|price|cost)\b",
];

const ANALYTICAL: &[&str] = &[
    r"\bwhy\b",
    r"\b(analy[sz]e|analysis)\b",
    r"\b(compare|comparison|contrast|versus|vs\.?)\b",
    r"\b(evaluate|assess|impact|implications?|effects? of|consequences?)\b",
    r"\b(difference|differences|differ)\b",
    r"\bpros and cons\b",
    r"^how (does|do|did|can|could|would|should)\b",
];

const EXPLORATORY: &[&str] = &[
    r"\b(explain|describe|elaborate)\b",
    r"\b(overview|summary|summari[sz]e)\b",
    r"\btell me (about|more)\b",
    r"\b(discuss|explore|walk me through)\b",
    r"\b(list all|main points|key points|themes?|topics)\b",
];

const CONVERSATIONAL: &[&str] = &[
    r"^(hi|hello|hey|greetings|good (morning|afternoon|evening)|thanks|thank you|bye|goodbye)\b",
    r"\bhow are you\b",
    r"\bwho are you\b",
    r"^(who|what) (are|can) you\b",
    r"^(ok|okay|cool|great|nice|yes|no|sure)[.!]*$",
    r"^[\d\s+\-*/().=?^%]+$",
];

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("(?i){}", pattern)).map_err(|e| AppError::Internal {
        message: format!("Invalid classifier pattern {:?}: {}", pattern, e),
    })
}

fn compile_all(patterns: &[&str]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| compile(p)).collect()
}

impl QueryClassifier {
    /// Create a classifier with the built-in pattern sets
    pub fn new() -> Result<Self> {
        let signals = vec![
            PatternSet { query_type: QueryType::Factual, patterns: compile_all(FACTUAL)? },
            PatternSet { query_type: QueryType::Analytical, patterns: compile_all(ANALYTICAL)? },
            PatternSet { query_type: QueryType::Exploratory, patterns: compile_all(EXPLORATORY)? },
            PatternSet {
                query_type: QueryType::Conversational,
                patterns: compile_all(CONVERSATIONAL)?,
            },
        ];

        Ok(Self {
            signals,
            greeting: compile(CONVERSATIONAL[0])?,
            arithmetic: compile(r"^[\d\s+\-*/().=?^%]*\d[\d\s+\-*/().=?^%]*$")?,
            single_term: compile(r"^(what|who) (is|are) (a |an |the )?[\w-]+\s*\??$")?,
            comparison: compile(
                r"\b(compare|comparison|contrast|versus|vs\.?|difference between|differences between|pros and cons)\b",
            )?,
            connectors: compile(
                r"\b(and|but|because|while|whereas|although|however|therefore|then)\b",
            )?,
        })
    }

    /// Classify a query
    ///
    /// `has_documents` is true when the user selected at least one document.
    pub fn classify(&self, query: &str, has_documents: bool) -> QueryClassification {
        let query = query.trim();

        let (query_type, confidence) = self.detect_type(query);
        let mut complexity = self.detect_complexity(query);
        let mut retrieval_mode = RetrievalMode::from(complexity);

        let mut reasoning = format!(
            "{} ({} complexity), {}",
            query_type.describe(),
            complexity.as_str(),
            retrieval_mode.describe()
        );

        if has_documents && retrieval_mode == RetrievalMode::NoRetrieval {
            retrieval_mode = RetrievalMode::SingleStep;
            if complexity == Complexity::Simple {
                complexity = Complexity::Moderate;
            }
            reasoning.push_str("; documents are selected, so retrieval is enforced");
        }

        QueryClassification {
            query_type,
            complexity,
            retrieval_mode,
            confidence,
            reasoning,
        }
    }

    /// Tally pattern matches per type; ties go to the earlier type
    fn detect_type(&self, query: &str) -> (QueryType, f32) {
        let scores: Vec<(QueryType, usize)> = self
            .signals
            .iter()
            .map(|set| {
                let hits = set.patterns.iter().filter(|p| p.is_match(query)).count();
                (set.query_type, hits)
            })
            .collect();

        let total: usize = scores.iter().map(|(_, hits)| hits).sum();
        if total == 0 {
            return (QueryType::Factual, 0.5);
        }

        let mut best = scores[0];
        for &candidate in &scores[1..] {
            if candidate.1 > best.1 {
                best = candidate;
            }
        }

        (best.0, best.1 as f32 / total as f32)
    }

    fn detect_complexity(&self, query: &str) -> Complexity {
        if self.arithmetic.is_match(query) {
            return Complexity::Simple;
        }

        // Complex signals win over a leading greeting
        let connectors = self.connectors.find_iter(query).count();
        let terminators = query.chars().filter(|c| matches!(c, '.' | '?' | '!')).count();
        if self.comparison.is_match(query)
            || connectors >= 2
            || query.chars().count() > 100
            || terminators > 2
        {
            return Complexity::Complex;
        }

        if self.greeting.is_match(query)
            || query.split_whitespace().count() <= 3
            || self.single_term.is_match(query)
        {
            return Complexity::Simple;
        }

        Complexity::Moderate
    }
}
