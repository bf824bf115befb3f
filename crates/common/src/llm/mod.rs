//! Chat-completion backend abstraction
//!
//! The orchestrator streams answers through `ChatBackend::chat_stream` and
//! the graders issue short deterministic calls through `ChatBackend::chat`.

mod ollama;

pub use ollama::OllamaClient;

use crate::errors::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Incremental text tokens produced by a streaming completion
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Chat role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Sampling options for one completion call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 4096,
            top_p: 0.9,
        }
    }
}

/// Reachability of the local inference server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub running: bool,
    pub models_available: bool,
    pub models: Vec<String>,
}

/// Trait for chat completion backends
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stream a completion token by token
    ///
    /// A backend that is still loading `model` reports `AppError::ModelLoading`,
    /// either from this call or as an item of the returned stream.
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<TokenStream>;

    /// Non-streaming completion
    async fn chat(&self, model: &str, messages: &[Message], options: &ChatOptions) -> Result<String>;

    /// Short connectivity check; never errors
    async fn ping(&self) -> bool;
}
