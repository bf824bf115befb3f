//! Chunk storage
//!
//! Ingestion (PDF parsing, chunking, embedding) happens elsewhere; this layer
//! only reads the chunks it produced. `InMemoryChunkStore` can be seeded from
//! a JSON export so the gateway runs without a database.

use crate::errors::{AppError, Result};
use crate::models::Chunk;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{info, instrument};

/// Read access to ingested chunks
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// All chunks of one document, in ingestion order
    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Every chunk across all documents
    async fn all_chunks(&self) -> Result<Vec<Chunk>>;

    /// Identifiers of the documents present in the store
    async fn document_ids(&self) -> Result<Vec<String>>;
}

/// Chunk store held in process memory
#[derive(Default)]
pub struct InMemoryChunkStore {
    documents: RwLock<HashMap<String, Vec<Chunk>>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from chunks, grouping them by document
    pub fn with_chunks(chunks: Vec<Chunk>) -> Self {
        let mut documents: HashMap<String, Vec<Chunk>> = HashMap::new();
        for chunk in chunks {
            documents.entry(chunk.document_id.clone()).or_default().push(chunk);
        }
        Self {
            documents: RwLock::new(documents),
        }
    }

    /// Load a JSON array of chunks
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read(path.as_ref()).await.map_err(|e| AppError::StoreError {
            message: format!("Failed to read {}: {}", path.as_ref().display(), e),
        })?;
        let chunks: Vec<Chunk> = serde_json::from_slice(&raw)?;

        let store = Self::with_chunks(chunks);
        info!(
            documents = store.documents.read().await.len(),
            "Loaded chunk store"
        );
        Ok(store)
    }

    /// Append chunks for their documents
    pub async fn insert_chunks(&self, chunks: Vec<Chunk>) {
        let mut documents = self.documents.write().await;
        for chunk in chunks {
            documents.entry(chunk.document_id.clone()).or_default().push(chunk);
        }
    }

    /// Drop a document and return how many chunks it had
    pub async fn remove_document(&self, document_id: &str) -> usize {
        self.documents
            .write()
            .await
            .remove(document_id)
            .map(|chunks| chunks.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .documents
            .read()
            .await
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn all_chunks(&self) -> Result<Vec<Chunk>> {
        Ok(self.documents.read().await.values().flatten().cloned().collect())
    }

    async fn document_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.documents.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
