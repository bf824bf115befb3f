//! Chat messages produced by the orchestrator

use crate::classifier::QueryClassification;
use crate::grader::RagGrade;
use folio_common::llm::{Message, Role};
use folio_common::models::SearchResult;
use serde::{Deserialize, Serialize};

/// Input for one message send
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub text: String,

    /// Documents selected as context; empty means none
    #[serde(default)]
    pub document_ids: Vec<String>,

    /// Prior conversation, oldest first
    #[serde(default)]
    pub history: Vec<Message>,
}

impl ChatRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_documents<I, S>(mut self, document_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.document_ids = document_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// Lifecycle state of an assistant message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Streaming,
    Completed,
    /// Stopped by the user or superseded by a newer message
    Aborted,
    Error,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Streaming => "streaming",
            MessageState::Completed => "completed",
            MessageState::Aborted => "aborted",
            MessageState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageState::Streaming)
    }
}

/// Timing and volume of a finished generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetrics {
    /// Streamed token count
    pub total_tokens: usize,
    pub tokens_per_second: f64,
    pub time_to_first_token_ms: Option<u64>,
    /// Whole message, classification through grading
    pub duration_ms: u64,
    pub retrieval_attempts: u32,
    /// Generation calls including model-loading retries
    pub generation_attempts: u32,
}

/// Incremental snapshot sent while a message is produced
///
/// `content` always carries the full text accumulated so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub id: String,
    pub content: String,
    pub is_streaming: bool,

    /// Present on the completed update only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SearchResult>>,

    /// Present on the completed update only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<GenerationMetrics>,

    pub state: MessageState,
}

/// Final assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,

    #[serde(default)]
    pub sources: Vec<SearchResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<GenerationMetrics>,

    pub classification: QueryClassification,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<RagGrade>,

    pub state: MessageState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatMessage {
    pub(crate) fn new(id: String, classification: QueryClassification) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            sources: Vec::new(),
            metrics: None,
            classification,
            quality: None,
            state: MessageState::Streaming,
            error: None,
        }
    }

    /// Snapshot of this message as an update
    pub fn to_update(&self) -> MessageUpdate {
        let completed = self.state == MessageState::Completed;
        MessageUpdate {
            id: self.id.clone(),
            content: self.content.clone(),
            is_streaming: !self.state.is_terminal(),
            sources: completed.then(|| self.sources.clone()),
            metrics: if completed { self.metrics.clone() } else { None },
            state: self.state,
        }
    }
}
