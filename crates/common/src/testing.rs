//! Deterministic in-process backends for tests and offline development
//!
//! `MockEmbedder` hashes words into a fixed-size vector so that texts sharing
//! words land close together. `MockChatBackend` replays scripted streams and
//! answers grading prompts through a configurable responder.

use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::llm::{ChatBackend, ChatOptions, Message, TokenStream};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Bag-of-words hashing embedder
pub struct MockEmbedder {
    dimension: usize,
    overrides: HashMap<String, Vec<f32>>,
    fail: bool,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            overrides: HashMap::new(),
            fail: false,
        }
    }

    /// Embedder whose every call fails like an unreachable backend
    pub fn failing(dimension: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(dimension)
        }
    }

    /// Return `vector` for exactly `text`
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.overrides.insert(text.to_string(), vector);
        self
    }

    fn hash_word(word: &str) -> u64 {
        // FNV-1a
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in word.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            return Err(AppError::BackendUnavailable {
                message: "mock embedder offline".to_string(),
            });
        }
        if let Some(vector) = self.overrides.get(text) {
            return Ok(vector.clone());
        }

        let mut vector = vec![0.0_f32; self.dimension];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let idx = (Self::hash_word(word) % self.dimension as u64) as usize;
            vector[idx] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Scripted behaviour for one `chat_stream` call
#[derive(Debug, Clone)]
pub enum StreamScript {
    /// Emit the tokens then finish
    Tokens(Vec<String>),
    /// Fail the call itself with a model-loading error
    Loading,
    /// Emit the tokens, then report model loading mid-stream
    LoadingAfter(Vec<String>),
    /// Emit the tokens, then never finish
    Hang(Vec<String>),
    /// Fail the call with a hard error
    Fail(String),
}

impl StreamScript {
    pub fn tokens(tokens: &[&str]) -> Self {
        StreamScript::Tokens(tokens.iter().map(|t| t.to_string()).collect())
    }
}

type Responder = Arc<dyn Fn(&[Message]) -> Result<String> + Send + Sync>;

/// Chat backend that replays scripts
pub struct MockChatBackend {
    scripts: Mutex<VecDeque<StreamScript>>,
    responder: Responder,
    stream_calls: Mutex<Vec<Vec<Message>>>,
    chat_calls: AtomicUsize,
    online: bool,
}

impl MockChatBackend {
    /// Streams "Mock answer." and answers every grading prompt with "yes"
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            responder: Arc::new(|_: &[Message]| Ok("yes".to_string())),
            stream_calls: Mutex::new(Vec::new()),
            chat_calls: AtomicUsize::new(0),
            online: true,
        }
    }

    /// Queue scripts consumed by successive `chat_stream` calls
    pub fn with_scripts(self, scripts: Vec<StreamScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..self
        }
    }

    /// Answer non-streaming calls with `responder`
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&[Message]) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            ..self
        }
    }

    /// Answer every non-streaming call with `reply`
    pub fn with_reply(self, reply: &str) -> Self {
        let reply = reply.to_string();
        self.with_responder(move |_| Ok(reply.clone()))
    }

    pub fn offline(self) -> Self {
        Self { online: false, ..self }
    }

    /// Messages received by each `chat_stream` call
    pub async fn stream_calls(&self) -> Vec<Vec<Message>> {
        self.stream_calls.lock().await.clone()
    }

    /// Number of non-streaming calls received
    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockChatBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn loading(model: &str) -> AppError {
    AppError::ModelLoading {
        model: model.to_string(),
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<TokenStream> {
        self.stream_calls.lock().await.push(messages.to_vec());
        let script = self
            .scripts
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| StreamScript::tokens(&["Mock ", "answer."]));

        let ok = |tokens: Vec<String>| stream::iter(tokens.into_iter().map(Ok));
        match script {
            StreamScript::Tokens(tokens) => Ok(ok(tokens).boxed()),
            StreamScript::Loading => Err(loading(model)),
            StreamScript::LoadingAfter(tokens) => {
                Ok(ok(tokens).chain(stream::iter([Err(loading(model))])).boxed())
            }
            StreamScript::Hang(tokens) => Ok(ok(tokens).chain(stream::pending()).boxed()),
            StreamScript::Fail(message) => Err(AppError::GenerationFailed { message }),
        }
    }

    async fn chat(&self, _model: &str, messages: &[Message], _options: &ChatOptions) -> Result<String> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(messages)
    }

    async fn ping(&self) -> bool {
        self.online
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;

    #[tokio::test]
    async fn test_mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("termination clause notice").await.unwrap();
        let b = embedder.embed("termination clause notice").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_mock_embedder_word_overlap() {
        let embedder = MockEmbedder::new(256);
        let query = embedder.embed("termination clause").await.unwrap();
        let close = embedder.embed("the termination clause requires notice").await.unwrap();
        let far = embedder.embed("quarterly revenue grew strongly").await.unwrap();

        let close_sim = cosine_similarity(&query, &close).unwrap();
        let far_sim = cosine_similarity(&query, &far).unwrap();
        assert!(close_sim > far_sim);
    }

    #[tokio::test]
    async fn test_scripts_replay_in_order() {
        let backend = MockChatBackend::new().with_scripts(vec![
            StreamScript::Loading,
            StreamScript::tokens(&["a", "b"]),
        ]);
        let options = ChatOptions::default();

        let err = backend.chat_stream("m", &[], &options).await.err().unwrap();
        assert!(err.is_model_loading());

        let tokens: Vec<String> = backend
            .chat_stream("m", &[], &options)
            .await
            .unwrap()
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["a", "b"]);
        assert_eq!(backend.stream_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_responder() {
        let backend = MockChatBackend::new().with_reply("no");
        let reply = backend.chat("m", &[Message::user("q")], &ChatOptions::default()).await.unwrap();
        assert_eq!(reply, "no");
        assert_eq!(backend.chat_calls(), 1);
    }
}
