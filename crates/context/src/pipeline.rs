//! Adaptive RAG pipeline
//!
//! Per message, strictly in order:
//! 1. Classify the query and pick a retrieval strategy
//! 2. Retrieve, grading the top source and relaxing thresholds on failure
//! 3. Assemble numbered-citation context
//! 4. Stream the answer, retrying while the model is still loading
//! 5. Grade the finished answer
//! 6. Strip reasoning markup and attach sources and metrics
//!
//! Cancellation is checked at every suspension point. A cancelled message
//! ends in the `Aborted` state with its partial text and no sources.

use crate::cancel::CancelToken;
use crate::classifier::{QueryClassification, QueryClassifier, RetrievalMode};
use crate::grader::QualityGrader;
use crate::message::{ChatMessage, ChatRequest, GenerationMetrics, MessageState, MessageUpdate};
use crate::prompt::{build_context, build_messages, strip_reasoning};
use crate::strategy::{RelaxPolicy, RetrievalStrategy};
use folio_common::config::AppConfig;
use folio_common::errors::{AppError, Result};
use folio_common::llm::{ChatBackend, ChatOptions, Message};
use folio_common::metrics;
use folio_common::models::SearchResult;
use folio_search::{Retriever, SearchRequest};
use futures::future::try_join_all;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub chat_model: String,
    pub top_p: f32,
    pub rerank: bool,
    pub relax: RelaxPolicy,
    pub single_step_attempts: u32,
    pub multi_step_attempts: u32,
    pub model_loading_backoff: Duration,
    pub model_loading_max_attempts: u32,
    pub history_window: usize,
    pub grade_answers: bool,
    pub grading_max_tokens: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            chat_model: folio_common::DEFAULT_CHAT_MODEL.to_string(),
            top_p: 0.9,
            rerank: true,
            relax: RelaxPolicy::default(),
            single_step_attempts: 1,
            multi_step_attempts: 3,
            model_loading_backoff: Duration::from_secs(2),
            model_loading_max_attempts: 5,
            history_window: 6,
            grade_answers: true,
            grading_max_tokens: 10,
        }
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            chat_model: config.ollama.chat_model.clone(),
            top_p: config.ollama.top_p,
            rerank: config.retrieval.rerank,
            relax: RelaxPolicy {
                similarity_step: config.retrieval.relax_similarity_step,
                similarity_floor: config.retrieval.similarity_floor,
                top_k_step: config.retrieval.top_k_step,
                top_k_cap: config.retrieval.relaxed_top_k_cap,
            },
            single_step_attempts: config.retrieval.single_step_attempts,
            multi_step_attempts: config.retrieval.multi_step_attempts,
            model_loading_backoff: config.model_loading_backoff(),
            model_loading_max_attempts: config.generation.model_loading_max_attempts,
            history_window: config.generation.history_window,
            grade_answers: config.generation.grade_answers,
            grading_max_tokens: config.generation.grading_max_tokens,
        }
    }
}

/// Accepted sources of the retrieval loop
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub sources: Vec<SearchResult>,
    pub attempts: u32,
}

/// Outcome of streaming an answer
enum Generation {
    Completed {
        content: String,
        tokens: usize,
        first_token: Option<Duration>,
        stream_time: Duration,
        attempts: u32,
    },
    Aborted {
        content: String,
    },
}

/// Result of a cancellable step
enum Step<T> {
    Done(T),
    Cancelled,
}

async fn or_cancel<F, T>(cancel: &CancelToken, future: F) -> Step<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Step::Cancelled,
        value = future => Step::Done(value),
    }
}

/// Deliver a terminal update
///
/// Waits for channel capacity only until `cancel` fires. Once cancelled the
/// update is offered without waiting and dropped if the channel is full.
async fn send_final(cancel: &CancelToken, updates: &mpsc::Sender<MessageUpdate>, update: MessageUpdate) {
    if !cancel.is_cancelled() {
        match or_cancel(cancel, updates.reserve()).await {
            Step::Done(Ok(permit)) => {
                permit.send(update);
                return;
            }
            Step::Done(Err(_)) => {
                debug!("Update receiver gone, final update dropped");
                return;
            }
            Step::Cancelled => {}
        }
    }

    match updates.try_send(update) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => debug!("Update channel full, final update dropped"),
        Err(TrySendError::Closed(_)) => debug!("Update receiver gone, final update dropped"),
    }
}

/// Shared pipeline; one instance serves every session
pub struct RagPipeline {
    classifier: QueryClassifier,
    retriever: Arc<dyn Retriever>,
    backend: Arc<dyn ChatBackend>,
    grader: QualityGrader,
    config: OrchestratorConfig,
}

impl RagPipeline {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        backend: Arc<dyn ChatBackend>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        Ok(Self {
            classifier: QueryClassifier::new()?,
            grader: QualityGrader::new(backend.clone(), config.grading_max_tokens),
            retriever,
            backend,
            config,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn classifier(&self) -> &QueryClassifier {
        &self.classifier
    }

    /// Produce one assistant message
    ///
    /// Updates are sent on `updates` as the answer streams. A closed
    /// channel is treated like a cancellation.
    #[instrument(skip_all, fields(documents = request.document_ids.len()))]
    pub async fn run(
        &self,
        request: &ChatRequest,
        cancel: &CancelToken,
        updates: &mpsc::Sender<MessageUpdate>,
    ) -> ChatMessage {
        let started = Instant::now();
        let classification = self
            .classifier
            .classify(&request.text, !request.document_ids.is_empty());
        let strategy =
            RetrievalStrategy::select(classification.query_type, classification.retrieval_mode);

        info!(
            query_type = classification.query_type.as_str(),
            complexity = classification.complexity.as_str(),
            mode = classification.retrieval_mode.as_str(),
            confidence = classification.confidence,
            "Query classified"
        );

        let mut message = ChatMessage::new(Uuid::new_v4().to_string(), classification.clone());

        let retrieval = match or_cancel(cancel, self.retrieve(request, &classification, strategy)).await {
            Step::Cancelled => return self.abort(message, String::new(), cancel, updates).await,
            Step::Done(Ok(retrieval)) => retrieval,
            Step::Done(Err(e)) => return self.fail(message, e, started, cancel, updates).await,
        };

        let context = build_context(&retrieval.sources);
        let messages = build_messages(&context, &request.text, &request.history, self.config.history_window);
        let options = ChatOptions {
            temperature: strategy.temperature,
            max_tokens: strategy.max_tokens,
            top_p: self.config.top_p,
        };

        let generation = match self.generate(&message.id, &messages, &options, cancel, updates).await {
            Ok(generation) => generation,
            Err(e) => return self.fail(message, e, started, cancel, updates).await,
        };

        let (content, tokens, first_token, stream_time, generation_attempts) = match generation {
            Generation::Aborted { content } => return self.abort(message, content, cancel, updates).await,
            Generation::Completed {
                content,
                tokens,
                first_token,
                stream_time,
                attempts,
            } => (strip_reasoning(&content), tokens, first_token, stream_time, attempts),
        };

        if self.config.grade_answers && !retrieval.sources.is_empty() {
            let grading = self.grader.grade_rag_response(
                &request.text,
                &content,
                &retrieval.sources,
                &self.config.chat_model,
            );
            match or_cancel(cancel, grading).await {
                Step::Done(grade) => {
                    info!(
                        retrieval = grade.retrieval.passed,
                        answer = grade.answer.passed,
                        hallucination = grade.hallucination.passed,
                        overall = grade.overall_passed,
                        "Answer graded"
                    );
                    message.quality = Some(grade);
                }
                Step::Cancelled => debug!("Grading skipped, message cancelled"),
            }
        }

        let tokens_per_second = if stream_time.as_secs_f64() > 0.0 {
            tokens as f64 / stream_time.as_secs_f64()
        } else {
            0.0
        };
        let duration = started.elapsed();

        message.content = content;
        message.sources = retrieval
            .sources
            .into_iter()
            .map(SearchResult::without_embedding)
            .collect();
        message.metrics = Some(GenerationMetrics {
            total_tokens: tokens,
            tokens_per_second,
            time_to_first_token_ms: first_token.map(|d| d.as_millis() as u64),
            duration_ms: duration.as_millis() as u64,
            retrieval_attempts: retrieval.attempts,
            generation_attempts,
        });
        message.state = MessageState::Completed;

        metrics::record_generation(message.state.as_str(), duration.as_secs_f64(), tokens_per_second);
        info!(
            tokens,
            sources = message.sources.len(),
            duration_ms = duration.as_millis() as u64,
            "Message completed"
        );

        // The returned message is authoritative
        send_final(cancel, updates, message.to_update()).await;
        message
    }

    /// Retrieval loop with grading and threshold relaxation
    #[instrument(skip_all, fields(mode = classification.retrieval_mode.as_str()))]
    pub async fn retrieve(
        &self,
        request: &ChatRequest,
        classification: &QueryClassification,
        strategy: RetrievalStrategy,
    ) -> Result<Retrieval> {
        let mode = classification.retrieval_mode;
        if mode == RetrievalMode::NoRetrieval {
            return Ok(Retrieval::default());
        }
        if request.document_ids.is_empty() || request.text.trim().is_empty() {
            debug!("Retrieval requested without documents or query text, continuing without context");
            return Ok(Retrieval::default());
        }

        let max_attempts = match mode {
            RetrievalMode::MultiStep => self.config.multi_step_attempts,
            _ => self.config.single_step_attempts,
        }
        .max(1);

        let mut strategy = strategy;
        let mut attempts = 0;
        let sources = loop {
            attempts += 1;
            let sources = self
                .search_documents(&request.text, &request.document_ids, &strategy, attempts > 1)
                .await?;

            let Some(top) = sources.first() else {
                info!(attempt = attempts, "No sources above threshold");
                break sources;
            };

            let grade = self
                .grader
                .grade_retrieval(&request.text, top, &self.config.chat_model)
                .await;
            if grade.passed {
                debug!(attempt = attempts, sources = sources.len(), "Retrieval accepted");
                break sources;
            }

            if attempts >= max_attempts {
                warn!(
                    attempts,
                    sources = sources.len(),
                    "Retrieval grading failed on every attempt, using last results"
                );
                break sources;
            }

            strategy.relax(&self.config.relax);
            info!(
                attempt = attempts,
                min_similarity = strategy.min_similarity,
                top_k = strategy.top_k,
                "Retrieval graded irrelevant, relaxing thresholds"
            );
        };

        metrics::record_retrieval_attempts(mode.as_str(), attempts);
        Ok(Retrieval { sources, attempts })
    }

    /// Search every selected document and keep the best `top_k` overall
    ///
    /// Relaxed attempts bypass the semantic cache, whose entries were
    /// selected under the stricter thresholds.
    async fn search_documents(
        &self,
        query: &str,
        document_ids: &[String],
        strategy: &RetrievalStrategy,
        relaxed: bool,
    ) -> Result<Vec<SearchResult>> {
        let searches = document_ids.iter().map(|document_id| {
            let request = SearchRequest {
                text: query.to_string(),
                document_id: Some(document_id.clone()),
                top_k: strategy.top_k,
                min_similarity: strategy.min_similarity,
                rerank: self.config.rerank,
                mmr_lambda: strategy.mmr_lambda,
                bypass_cache: relaxed,
            };
            async move { self.retriever.search(&request).await }
        });

        let mut sources: Vec<SearchResult> = try_join_all(searches)
            .await?
            .into_iter()
            .flat_map(|response| response.results)
            .collect();

        sources.sort_by(|a, b| b.score.total_cmp(&a.score));
        sources.truncate(strategy.top_k);
        Ok(sources)
    }

    /// Stream an answer, retrying the whole call while the model loads
    async fn generate(
        &self,
        id: &str,
        messages: &[Message],
        options: &ChatOptions,
        cancel: &CancelToken,
        updates: &mpsc::Sender<MessageUpdate>,
    ) -> Result<Generation> {
        let max_attempts = self.config.model_loading_max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.stream_once(id, messages, options, cancel, updates).await {
                Ok(Generation::Completed {
                    content,
                    tokens,
                    first_token,
                    stream_time,
                    ..
                }) => {
                    return Ok(Generation::Completed {
                        content,
                        tokens,
                        first_token,
                        stream_time,
                        attempts: attempt,
                    })
                }
                Ok(aborted) => return Ok(aborted),
                Err(e) if e.is_model_loading() && attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        backoff_ms = self.config.model_loading_backoff.as_millis() as u64,
                        "Model still loading, retrying generation"
                    );
                    let backoff = tokio::time::sleep(self.config.model_loading_backoff);
                    if let Step::Cancelled = or_cancel(cancel, backoff).await {
                        return Ok(Generation::Aborted { content: String::new() });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One streaming call; partial text is local to the attempt
    async fn stream_once(
        &self,
        id: &str,
        messages: &[Message],
        options: &ChatOptions,
        cancel: &CancelToken,
        updates: &mpsc::Sender<MessageUpdate>,
    ) -> Result<Generation> {
        let started = Instant::now();
        let call = self
            .backend
            .chat_stream(&self.config.chat_model, messages, options);
        let mut stream = match or_cancel(cancel, call).await {
            Step::Done(stream) => stream?,
            Step::Cancelled => return Ok(Generation::Aborted { content: String::new() }),
        };

        let mut content = String::new();
        let mut tokens = 0;
        let mut first_token = None;

        loop {
            let next = match or_cancel(cancel, stream.next()).await {
                Step::Done(next) => next,
                Step::Cancelled => return Ok(Generation::Aborted { content }),
            };

            match next {
                Some(Ok(token)) => {
                    first_token.get_or_insert_with(|| started.elapsed());
                    tokens += 1;
                    content.push_str(&token);

                    let update = MessageUpdate {
                        id: id.to_string(),
                        content: content.clone(),
                        is_streaming: true,
                        sources: None,
                        metrics: None,
                        state: MessageState::Streaming,
                    };
                    match or_cancel(cancel, updates.send(update)).await {
                        Step::Done(Ok(())) => {}
                        Step::Done(Err(_)) => {
                            debug!("Update receiver dropped, aborting generation");
                            return Ok(Generation::Aborted { content });
                        }
                        Step::Cancelled => return Ok(Generation::Aborted { content }),
                    }
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        Ok(Generation::Completed {
            content,
            tokens,
            first_token,
            stream_time: started.elapsed(),
            attempts: 1,
        })
    }

    async fn abort(
        &self,
        mut message: ChatMessage,
        content: String,
        cancel: &CancelToken,
        updates: &mpsc::Sender<MessageUpdate>,
    ) -> ChatMessage {
        info!(partial_chars = content.len(), "Message aborted");
        message.content = strip_reasoning(&content);
        message.state = MessageState::Aborted;
        metrics::record_generation(message.state.as_str(), 0.0, 0.0);
        send_final(cancel, updates, message.to_update()).await;
        message
    }

    async fn fail(
        &self,
        mut message: ChatMessage,
        err: AppError,
        started: Instant,
        cancel: &CancelToken,
        updates: &mpsc::Sender<MessageUpdate>,
    ) -> ChatMessage {
        error!(error = %err, code = ?err.code(), "Message failed");
        message.content = err.user_message();
        message.error = Some(err.to_string());
        message.state = MessageState::Error;
        metrics::record_generation(message.state.as_str(), started.elapsed().as_secs_f64(), 0.0);
        send_final(cancel, updates, message.to_update()).await;
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::QueryType;
    use folio_common::cache::{SemanticCache, SemanticCacheConfig};
    use folio_common::models::Chunk;
    use folio_common::store::InMemoryChunkStore;
    use folio_common::testing::{MockChatBackend, MockEmbedder, StreamScript};
    use folio_search::{SearchConfig, SearchResponse, SemanticSearch};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ANALYTICAL_QUERY: &str =
        "Why does the termination clause differ from the fee schedule and how do they compare?";

    /// Records every request before delegating to the semantic engine
    struct RecordingRetriever {
        inner: SemanticSearch,
        requests: tokio::sync::Mutex<Vec<SearchRequest>>,
    }

    #[async_trait::async_trait]
    impl Retriever for RecordingRetriever {
        async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
            self.requests.lock().await.push(request.clone());
            self.inner.search(request).await
        }
    }

    fn chunks() -> Vec<Chunk> {
        vec![
            Chunk::new("t1", "contract", "The termination clause requires ninety days notice.", 3, vec![1.0, 0.0, 0.0]),
            Chunk::new("t2", "contract", "Fees are payable monthly.", 5, vec![0.6, 0.8, 0.0]),
            Chunk::new("t3", "contract", "Appendix of definitions.", 9, vec![0.0, 0.0, 1.0]),
        ]
    }

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            chat_model: "test-model".into(),
            model_loading_backoff: Duration::from_millis(1),
            ..OrchestratorConfig::default()
        }
    }

    fn search_engine() -> SemanticSearch {
        let embedder = MockEmbedder::new(3)
            .with_vector("What is the termination clause?", vec![1.0, 0.0, 0.0])
            .with_vector(ANALYTICAL_QUERY, vec![0.0, 0.6, 0.8]);
        SemanticSearch::new(
            Arc::new(embedder),
            Arc::new(InMemoryChunkStore::with_chunks(chunks())),
            Arc::new(SemanticCache::new(SemanticCacheConfig::default())),
            SearchConfig::default(),
        )
    }

    fn pipeline_with(backend: MockChatBackend, config: OrchestratorConfig) -> (Arc<MockChatBackend>, RagPipeline) {
        let backend = Arc::new(backend);
        let pipeline = RagPipeline::new(Arc::new(search_engine()), backend.clone(), config).unwrap();
        (backend, pipeline)
    }

    fn pipeline(backend: MockChatBackend) -> (Arc<MockChatBackend>, RagPipeline) {
        pipeline_with(backend, test_config())
    }

    async fn run(pipeline: &RagPipeline, request: ChatRequest) -> (ChatMessage, Vec<MessageUpdate>) {
        let (tx, mut rx) = mpsc::channel(64);
        let message = pipeline.run(&request, &CancelToken::new(), &tx).await;
        drop(tx);
        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        (message, updates)
    }

    #[tokio::test]
    async fn test_no_retrieval_uses_general_persona() {
        let (backend, pipeline) = pipeline(MockChatBackend::new());
        let (message, updates) = run(&pipeline, ChatRequest::new("Hi")).await;

        assert_eq!(message.state, MessageState::Completed);
        assert_eq!(message.content, "Mock answer.");
        assert!(message.sources.is_empty());
        assert!(message.quality.is_none());

        let calls = backend.stream_calls().await;
        assert!(!calls[0][0].content.contains("Document excerpts"));
        assert_eq!(backend.chat_calls(), 0);

        let last = updates.last().unwrap();
        assert_eq!(last.state, MessageState::Completed);
        assert!(last.metrics.is_some());
        assert!(updates[..updates.len() - 1].iter().all(|u| u.is_streaming));
    }

    #[tokio::test]
    async fn test_single_step_retrieval_builds_context() {
        let (backend, pipeline) = pipeline(MockChatBackend::new());
        let request = ChatRequest::new("What is the termination clause?").with_documents(["contract"]);
        let (message, _) = run(&pipeline, request).await;

        assert_eq!(message.state, MessageState::Completed);
        assert_eq!(message.sources[0].chunk.id, "t1");
        assert!(message.sources.iter().all(|s| s.chunk.embedding.is_none()));

        let system = &backend.stream_calls().await[0][0].content;
        assert!(system.contains("[Source 1, Page 3]"));
        assert!(!system.contains("Appendix of definitions"));

        let metrics = message.metrics.unwrap();
        assert_eq!(metrics.retrieval_attempts, 1);
        assert_eq!(metrics.generation_attempts, 1);
        assert_eq!(metrics.total_tokens, 2);
        // retrieval grade + three post-generation grades
        assert_eq!(backend.chat_calls(), 4);
        assert!(message.quality.unwrap().overall_passed);
    }

    #[tokio::test]
    async fn test_multi_step_stops_after_three_failed_grades() {
        let retrieval_grades = Arc::new(AtomicUsize::new(0));
        let counter = retrieval_grades.clone();
        let backend = MockChatBackend::new().with_responder(move |messages: &[Message]| {
            if messages[0].content.contains("retrieved document is relevant") {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok("no".to_string())
        });
        let (_, pipeline) = pipeline(backend);

        let request = ChatRequest::new(ANALYTICAL_QUERY).with_documents(["contract"]);
        let classification = pipeline.classifier().classify(&request.text, true);
        assert_eq!(classification.retrieval_mode, RetrievalMode::MultiStep);
        assert_eq!(classification.query_type, QueryType::Analytical);

        let strategy = RetrievalStrategy::select(classification.query_type, classification.retrieval_mode);
        let retrieval = pipeline.retrieve(&request, &classification, strategy).await.unwrap();

        assert_eq!(retrieval.attempts, 3);
        assert_eq!(retrieval_grades.load(Ordering::SeqCst), 3);
        assert!(!retrieval.sources.is_empty());
    }

    #[tokio::test]
    async fn test_relaxed_second_attempt_is_accepted() {
        let retrieval_grades = Arc::new(AtomicUsize::new(0));
        let counter = retrieval_grades.clone();
        let backend = Arc::new(MockChatBackend::new().with_responder(move |messages: &[Message]| {
            if messages[0].content.contains("retrieved document is relevant") {
                let seen = counter.fetch_add(1, Ordering::SeqCst);
                return Ok(if seen == 0 { "no" } else { "yes" }.to_string());
            }
            Ok("yes".to_string())
        }));
        let retriever = Arc::new(RecordingRetriever {
            inner: search_engine(),
            requests: tokio::sync::Mutex::new(Vec::new()),
        });
        let pipeline = RagPipeline::new(retriever.clone(), backend, test_config()).unwrap();

        let request = ChatRequest::new(ANALYTICAL_QUERY).with_documents(["contract"]);
        let classification = pipeline.classifier().classify(&request.text, true);
        let strategy = RetrievalStrategy::select(classification.query_type, classification.retrieval_mode);
        let retrieval = pipeline.retrieve(&request, &classification, strategy).await.unwrap();

        assert_eq!(retrieval.attempts, 2);
        assert_eq!(retrieval_grades.load(Ordering::SeqCst), 2);
        assert!(!retrieval.sources.is_empty());

        let requests = retriever.requests.lock().await;
        assert_eq!(requests.len(), 2);
        let (first, second) = (&requests[0], &requests[1]);
        assert_eq!(first.min_similarity, strategy.min_similarity);
        assert_eq!(first.top_k, strategy.top_k);
        assert!((first.min_similarity - second.min_similarity - 0.1).abs() < 1e-6);
        assert_eq!(second.top_k, first.top_k + 5);
        assert!(!first.bypass_cache);
        assert!(second.bypass_cache);

        // The relaxed attempt neither read nor refreshed the cache
        let stats = retriever.inner.cache().stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[tokio::test]
    async fn test_zero_results_skip_grading() {
        let (backend, pipeline) = pipeline(MockChatBackend::new());
        let request = ChatRequest::new("What is the termination clause?").with_documents(["missing"]);
        let (message, _) = run(&pipeline, request).await;

        assert_eq!(message.state, MessageState::Completed);
        assert!(message.sources.is_empty());
        assert_eq!(backend.chat_calls(), 0);
    }

    #[tokio::test]
    async fn test_model_loading_is_retried() {
        let backend = MockChatBackend::new().with_scripts(vec![
            StreamScript::Loading,
            StreamScript::LoadingAfter(vec!["stale ".into()]),
            StreamScript::tokens(&["fresh"]),
        ]);
        let (backend, pipeline) = pipeline(backend);
        let (message, updates) = run(&pipeline, ChatRequest::new("Hi")).await;

        assert_eq!(message.state, MessageState::Completed);
        assert_eq!(message.content, "fresh");
        assert_eq!(message.metrics.unwrap().generation_attempts, 3);
        assert_eq!(backend.stream_calls().await.len(), 3);
        assert_eq!(updates.last().unwrap().content, "fresh");
    }

    #[tokio::test]
    async fn test_model_loading_gives_up() {
        let scripts = vec![StreamScript::Loading; 5];
        let (backend, pipeline) = pipeline(MockChatBackend::new().with_scripts(scripts));
        let (message, _) = run(&pipeline, ChatRequest::new("Hi")).await;

        assert_eq!(message.state, MessageState::Error);
        assert_eq!(backend.stream_calls().await.len(), 5);
        assert!(message.error.unwrap().contains("loading"));
    }

    #[tokio::test]
    async fn test_backend_failure_is_error_state() {
        let backend = MockChatBackend::new().with_scripts(vec![StreamScript::Fail("boom".into())]);
        let (_, pipeline) = pipeline(backend);
        let (message, updates) = run(&pipeline, ChatRequest::new("Hi")).await;

        assert_eq!(message.state, MessageState::Error);
        assert!(!message.content.is_empty());
        let last = updates.last().unwrap();
        assert_eq!(last.state, MessageState::Error);
        assert!(!last.is_streaming);
    }

    #[tokio::test]
    async fn test_reasoning_markup_is_stripped() {
        let backend = MockChatBackend::new()
            .with_scripts(vec![StreamScript::tokens(&["<think>plan", "</think>", "Answer."])]);
        let (_, pipeline) = pipeline(backend);
        let (message, _) = run(&pipeline, ChatRequest::new("Hi")).await;
        assert_eq!(message.content, "Answer.");
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_aborts() {
        let backend = MockChatBackend::new().with_scripts(vec![StreamScript::Hang(vec!["partial".into()])]);
        let (_, pipeline) = pipeline(backend);
        let pipeline = Arc::new(pipeline);
        let cancel = CancelToken::new();
        let (tx, mut rx) = mpsc::channel(64);

        let task = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(&ChatRequest::new("Hi"), &cancel, &tx).await })
        };

        let first = rx.recv().await.unwrap();
        assert_eq!(first.content, "partial");
        cancel.cancel();

        let message = task.await.unwrap();
        assert_eq!(message.state, MessageState::Aborted);
        assert_eq!(message.content, "partial");
        assert!(message.sources.is_empty());
        assert!(message.metrics.is_none());
        assert!(message.error.is_none());
    }

    #[tokio::test]
    async fn test_cancel_with_stalled_receiver_aborts() {
        let backend = MockChatBackend::new().with_scripts(vec![StreamScript::tokens(&[
            "one ", "two ", "three ", "four ", "five ", "six ", "seven ", "eight ", "nine ", "ten",
        ])]);
        let (_, pipeline) = pipeline(backend);
        let pipeline = Arc::new(pipeline);
        let cancel = CancelToken::new();
        let (tx, mut rx) = mpsc::channel(1);

        let task = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(&ChatRequest::new("Hi"), &cancel, &tx).await })
        };

        // Read once, then leave the receiver alive but idle
        let first = rx.recv().await.unwrap();
        assert_eq!(first.content, "one ");
        cancel.cancel();

        let message = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("run did not finish after cancellation")
            .unwrap();
        assert_eq!(message.state, MessageState::Aborted);
        assert!(message.content.starts_with("one"));
        assert_ne!(message.content, "one two three four five six seven eight nine ten");
        drop(rx);
    }

    #[tokio::test]
    async fn test_cancel_during_model_loading_backoff_aborts() {
        let config = OrchestratorConfig {
            model_loading_backoff: Duration::from_secs(30),
            ..test_config()
        };
        let backend = MockChatBackend::new().with_scripts(vec![StreamScript::Loading]);
        let (backend, pipeline) = pipeline_with(backend, config);
        let pipeline = Arc::new(pipeline);
        let cancel = CancelToken::new();
        let (tx, mut rx) = mpsc::channel(8);

        let task = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(&ChatRequest::new("Hi"), &cancel, &tx).await })
        };

        while backend.stream_calls().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();

        let message = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("backoff was not interrupted by cancellation")
            .unwrap();
        assert_eq!(message.state, MessageState::Aborted);
        assert!(message.content.is_empty());
        assert!(message.error.is_none());
        assert_eq!(backend.stream_calls().await.len(), 1);

        let update = rx.recv().await.unwrap();
        assert_eq!(update.state, MessageState::Aborted);
        assert!(!update.is_streaming);
    }
}
