//! Quality Graders - LLM-judged yes/no checks
//!
//! Provides:
//! - Retrieval relevance of the top-ranked source
//! - Answer relevance to the question
//! - Hallucination check of the answer against the top sources
//!
//! Graders fail open: when the grading call itself errors the check passes
//! with a neutral score, so grading never blocks an answer.

use crate::prompt::strip_reasoning;
use folio_common::errors::Result;
use folio_common::llm::{ChatBackend, ChatOptions, Message};
use folio_common::metrics;
use folio_common::models::SearchResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Sources compared against the answer by the hallucination check
pub const HALLUCINATION_SOURCES: usize = 3;

/// Outcome of one grading call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    pub passed: bool,

    /// 1.0 for yes, 0.0 for no, 0.5 when no verdict was obtained
    pub score: f32,

    pub reasoning: String,
}

impl GradeResult {
    fn verdict(passed: bool, reasoning: impl Into<String>) -> Self {
        Self {
            passed,
            score: if passed { 1.0 } else { 0.0 },
            reasoning: reasoning.into(),
        }
    }

    fn fail_open(reasoning: impl Into<String>) -> Self {
        Self {
            passed: true,
            score: 0.5,
            reasoning: reasoning.into(),
        }
    }
}

/// Combined post-generation grade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagGrade {
    pub retrieval: GradeResult,
    pub answer: GradeResult,
    pub hallucination: GradeResult,
    pub overall_passed: bool,
}

const RETRIEVAL_SYSTEM: &str = "You are a grader assessing whether a retrieved document is relevant \
to a user question. If the document contains keywords or meaning related to the question, grade it \
as relevant. Reply with a single word: yes or no.";

const ANSWER_SYSTEM: &str = "You are a grader assessing whether an answer addresses a question. \
Reply with a single word: yes or no.";

const HALLUCINATION_SYSTEM: &str = "You are a grader assessing whether an answer is grounded in \
a set of retrieved facts. Reply with a single word: yes if the answer is supported by the facts, \
no otherwise.";

/// Parse a yes/no verdict from the first decisive word of a reply
fn parse_verdict(reply: &str) -> Option<bool> {
    let reply = strip_reasoning(reply).to_lowercase();
    reply
        .split(|c: char| !c.is_alphanumeric())
        .find_map(|word| match word {
            "yes" => Some(true),
            "no" => Some(false),
            _ => None,
        })
}

/// LLM-backed quality grader
pub struct QualityGrader {
    backend: Arc<dyn ChatBackend>,
    max_tokens: u32,
}

impl QualityGrader {
    pub fn new(backend: Arc<dyn ChatBackend>, max_tokens: u32) -> Self {
        Self { backend, max_tokens }
    }

    async fn ask(&self, name: &str, model: &str, system: &str, prompt: String) -> GradeResult {
        let options = ChatOptions {
            temperature: 0.0,
            max_tokens: self.max_tokens,
            ..ChatOptions::default()
        };
        let messages = [Message::system(system), Message::user(prompt)];

        let reply: Result<String> = self.backend.chat(model, &messages, &options).await;
        let grade = match reply {
            Ok(reply) => match parse_verdict(&reply) {
                Some(true) => GradeResult::verdict(true, format!("{} check passed", name)),
                Some(false) => GradeResult::verdict(false, format!("{} check failed", name)),
                None => {
                    debug!(grader = name, reply = %reply, "No verdict in grading reply");
                    GradeResult::fail_open(format!("{} check gave no verdict, assuming pass", name))
                }
            },
            Err(e) => {
                warn!(grader = name, error = %e, "Grading call failed, assuming pass");
                GradeResult::fail_open(format!("{} check unavailable ({}), assuming pass", name, e))
            }
        };

        metrics::record_grade(name, grade.passed);
        grade
    }

    /// Is the top-ranked source relevant to the question?
    pub async fn grade_retrieval(&self, query: &str, top_document: &SearchResult, model: &str) -> GradeResult {
        let prompt = format!(
            "Retrieved document:\n{}\n\nUser question: {}\n\nIs the document relevant to the question?",
            top_document.chunk.text, query
        );
        self.ask("retrieval", model, RETRIEVAL_SYSTEM, prompt).await
    }

    /// Does the answer address the question?
    pub async fn grade_answer(&self, query: &str, answer: &str, model: &str) -> GradeResult {
        let prompt = format!(
            "User question: {}\n\nAnswer:\n{}\n\nDoes the answer address the question?",
            query, answer
        );
        self.ask("answer", model, ANSWER_SYSTEM, prompt).await
    }

    /// Is the answer grounded in the top sources?
    ///
    /// With no sources there is nothing to contradict and the check passes.
    pub async fn grade_hallucination(&self, answer: &str, documents: &[SearchResult], model: &str) -> GradeResult {
        if documents.is_empty() {
            return GradeResult::verdict(true, "No sources to check against");
        }

        let facts = documents
            .iter()
            .take(HALLUCINATION_SOURCES)
            .map(|doc| doc.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let prompt = format!(
            "Facts:\n{}\n\nAnswer:\n{}\n\nIs the answer grounded in the facts?",
            facts, answer
        );
        self.ask("hallucination", model, HALLUCINATION_SYSTEM, prompt).await
    }

    /// Run all three checks concurrently
    pub async fn grade_rag_response(
        &self,
        query: &str,
        answer: &str,
        sources: &[SearchResult],
        model: &str,
    ) -> RagGrade {
        let retrieval = async {
            match sources.first() {
                Some(top) => self.grade_retrieval(query, top, model).await,
                None => GradeResult::verdict(true, "No sources retrieved"),
            }
        };

        let (retrieval, answer, hallucination) = tokio::join!(
            retrieval,
            self.grade_answer(query, answer, model),
            self.grade_hallucination(answer, sources, model)
        );

        let overall_passed = retrieval.passed && answer.passed && hallucination.passed;
        RagGrade {
            retrieval,
            answer,
            hallucination,
            overall_passed,
        }
    }
}
