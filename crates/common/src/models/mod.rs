//! Retrieval data model
//!
//! `Chunk` is produced by document ingestion and is read-only here.
//! `SearchResult` is built fresh per search call and never persisted.

use serde::{Deserialize, Serialize};

/// Unit of retrievable text cut from a document during ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,

    #[serde(alias = "documentId")]
    pub document_id: String,

    pub text: String,

    #[serde(alias = "pageNumber", default)]
    pub page_number: u32,

    /// Absent when ingestion has not embedded the chunk yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Approximate token count for context budgeting
    #[serde(default)]
    pub tokens: usize,
}

impl Chunk {
    pub fn new(
        id: impl Into<String>,
        document_id: impl Into<String>,
        text: impl Into<String>,
        page_number: u32,
        embedding: Vec<f32>,
    ) -> Self {
        let text = text.into();
        let tokens = estimate_tokens(&text);
        Self {
            id: id.into(),
            document_id: document_id.into(),
            text,
            page_number,
            embedding: Some(embedding),
            tokens,
        }
    }
}

/// A chunk annotated for one search call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub chunk: Chunk,

    /// Raw cosine similarity between query and chunk embeddings
    pub similarity: f32,

    /// Ranking score: similarity plus any lexical re-rank boost
    pub score: f32,

    /// Display text
    pub snippet: String,

    /// Passages to emphasise in the UI
    #[serde(default)]
    pub highlights: Vec<String>,
}

impl SearchResult {
    pub fn page_number(&self) -> u32 {
        self.chunk.page_number
    }

    pub fn document_id(&self) -> &str {
        &self.chunk.document_id
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.chunk.embedding.as_deref()
    }

    /// Drop the embedding before sending the result over the wire
    pub fn without_embedding(mut self) -> Self {
        self.chunk.embedding = None;
        self
    }
}

/// Rough token estimate (~4 characters per token)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
