//! Folio Context Engine
//!
//! Adaptive retrieval-augmented generation:
//! - Rule-based query classification and retrieval strategy selection
//! - LLM-judged quality grading (retrieval, answer, hallucination)
//! - Prompt and numbered-citation context assembly
//! - Streaming generation with model-loading retry and cancellation

pub mod cancel;
pub mod classifier;
pub mod grader;
pub mod message;
pub mod pipeline;
pub mod prompt;
pub mod session;
pub mod strategy;

pub use cancel::CancelToken;
pub use classifier::{Complexity, QueryClassification, QueryClassifier, QueryType, RetrievalMode};
pub use grader::{GradeResult, QualityGrader, RagGrade};
pub use message::{ChatMessage, ChatRequest, GenerationMetrics, MessageState, MessageUpdate};
pub use pipeline::{OrchestratorConfig, RagPipeline, Retrieval};
pub use session::ChatSession;
pub use strategy::{RelaxPolicy, RetrievalStrategy};
