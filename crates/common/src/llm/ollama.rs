//! Ollama HTTP client
//!
//! Implements both backend contracts against a local Ollama server:
//! - `GET /api/version` and `GET /api/tags` for connectivity and model listing
//! - `POST /api/embeddings` for embeddings
//! - `POST /api/chat` for streaming (NDJSON) and non-streaming completions

use super::{BackendStatus, ChatBackend, ChatOptions, Message, TokenStream};
use crate::config::OllamaConfig;
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Client for a local Ollama server
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    config: OllamaConfig,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f64>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

/// One parsed line of a streaming chat response
#[derive(Debug, PartialEq)]
enum StreamLine {
    Token(String),
    Done,
    Skip,
}

impl OllamaClient {
    /// Create a new client
    pub fn new(config: OllamaConfig) -> Result<Self> {
        // No client-wide timeout: streaming generations run for minutes
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.ping_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Server running plus the installed model names
    pub async fn status(&self) -> BackendStatus {
        if !self.ping().await {
            return BackendStatus::default();
        }

        let models = match self.list_models().await {
            Ok(models) => models,
            Err(e) => {
                warn!(error = %e, "Failed to list Ollama models");
                Vec::new()
            }
        };

        BackendStatus {
            running: true,
            models_available: !models.is_empty(),
            models,
        }
    }

    /// Installed model names
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(Duration::from_secs(self.config.ping_timeout_secs))
            .send()
            .await
            .map_err(connectivity_error)?;

        if !response.status().is_success() {
            return Err(AppError::BackendUnavailable {
                message: format!("Listing models failed: HTTP {}", response.status()),
            });
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn chat_body(&self, model: &str, messages: &[Message], options: &ChatOptions, stream: bool) -> serde_json::Value {
        let mut ollama_options = json!({
            "temperature": options.temperature,
            "num_predict": options.max_tokens,
            "top_p": options.top_p,
            "repeat_penalty": self.config.repeat_penalty,
            "repeat_last_n": self.config.repeat_last_n,
        });
        if stream {
            ollama_options["num_ctx"] = json!(self.config.num_ctx);
        }

        json!({
            "model": model,
            "messages": messages,
            "stream": stream,
            "options": ollama_options,
        })
    }
}

/// Map a transport failure to a backend error
fn connectivity_error(err: reqwest::Error) -> AppError {
    if err.is_connect() || err.is_timeout() {
        AppError::BackendUnavailable {
            message: err.to_string(),
        }
    } else {
        AppError::HttpClient(err)
    }
}

/// Classify an error reported by Ollama for `model`
fn classify_backend_error(status: Option<StatusCode>, body: &str, model: &str) -> AppError {
    let lower = body.to_lowercase();
    if status == Some(StatusCode::SERVICE_UNAVAILABLE) || lower.contains("loading") {
        return AppError::ModelLoading { model: model.to_string() };
    }
    if status == Some(StatusCode::NOT_FOUND) || lower.contains("not found") {
        return AppError::ModelNotFound { model: model.to_string() };
    }
    let message = match status {
        Some(status) => format!("HTTP {}: {}", status, body),
        None => body.to_string(),
    };
    AppError::GenerationFailed { message }
}

async fn check_status(response: reqwest::Response, model: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(classify_backend_error(Some(status), &body, model))
}

fn parse_stream_line(line: &str, model: &str) -> Result<StreamLine> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(StreamLine::Skip);
    }

    let data: serde_json::Value = match serde_json::from_str(line) {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, "Failed to parse stream line");
            return Ok(StreamLine::Skip);
        }
    };

    if let Some(error) = data.get("error") {
        let message = error.as_str().unwrap_or("Unknown error");
        return Err(classify_backend_error(None, message, model));
    }

    let content = data
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or_default();
    let done = data.get("done").and_then(|d| d.as_bool()).unwrap_or(false);

    if !content.is_empty() {
        Ok(StreamLine::Token(content.to_string()))
    } else if done {
        Ok(StreamLine::Done)
    } else {
        Ok(StreamLine::Skip)
    }
}

/// Decode an Ollama NDJSON chat body into content tokens
fn ndjson_tokens<S, B>(mut bytes: S, model: String) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<B>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    async_stream::try_stream! {
        let mut buffer: Vec<u8> = Vec::new();
        let mut finished = false;

        while !finished {
            let Some(chunk) = bytes.next().await else { break };
            buffer.extend_from_slice(chunk?.as_ref());

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                match parse_stream_line(&String::from_utf8_lossy(&line), &model)? {
                    StreamLine::Token(token) => yield token,
                    StreamLine::Done => {
                        finished = true;
                        break;
                    }
                    StreamLine::Skip => {}
                }
            }
        }

        if !finished {
            if let StreamLine::Token(token) = parse_stream_line(&String::from_utf8_lossy(&buffer), &model)? {
                yield token;
            }
        }
        debug!(model = %model, "Ollama stream finished");
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<TokenStream> {
        info!(model, messages = messages.len(), "Ollama streaming chat request");

        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&self.chat_body(model, messages, options, true))
            .send()
            .await
            .map_err(connectivity_error)?;
        let response = check_status(response, model).await?;

        Ok(Box::pin(ndjson_tokens(response.bytes_stream().boxed(), model.to_string())))
    }

    async fn chat(&self, model: &str, messages: &[Message], options: &ChatOptions) -> Result<String> {
        debug!(model, messages = messages.len(), "Ollama chat request");

        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&self.chat_body(model, messages, options, false))
            .timeout(Duration::from_secs(self.config.chat_timeout_secs))
            .send()
            .await
            .map_err(connectivity_error)?;
        let response = check_status(response, model).await?;

        let data: ChatResponse = response.json().await?;
        Ok(data.message.content)
    }

    async fn ping(&self) -> bool {
        match self
            .client
            .get(self.url("/api/version"))
            .timeout(Duration::from_secs(self.config.ping_timeout_secs))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "Ollama ping returned non-success status");
                false
            }
            Err(e) => {
                info!(error = %e, "Ollama ping failed");
                false
            }
        }
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let model = self.config.embedding_model.as_str();

        let result = async {
            let response = self
                .client
                .post(self.url("/api/embeddings"))
                .json(&EmbeddingRequest { model, prompt: text })
                .timeout(Duration::from_secs(self.config.embedding_timeout_secs))
                .send()
                .await
                .map_err(connectivity_error)?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(match classify_backend_error(Some(status), &body, model) {
                    AppError::GenerationFailed { message } => AppError::EmbeddingError { message },
                    other => other,
                });
            }

            let data: EmbeddingResponse = response.json().await.map_err(|e| AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            })?;

            if data.embedding.is_empty() {
                return Err(AppError::EmbeddingError {
                    message: "Empty embedding returned".to_string(),
                });
            }
            Ok(data.embedding.into_iter().map(|v| v as f32).collect::<Vec<f32>>())
        }
        .await;

        metrics::record_embedding(start.elapsed().as_secs_f64(), model, result.is_ok());
        result
    }

    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dimension
    }
}
