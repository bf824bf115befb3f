//! End-to-end message flows against mock backends

use folio_common::cache::{SemanticCache, SemanticCacheConfig};
use folio_common::llm::Role;
use folio_common::models::Chunk;
use folio_common::store::InMemoryChunkStore;
use folio_common::testing::{MockChatBackend, MockEmbedder, StreamScript};
use folio_context::{
    ChatMessage, ChatRequest, ChatSession, Complexity, MessageState, MessageUpdate,
    OrchestratorConfig, QueryType, RagPipeline, RetrievalMode, RetrievalStrategy,
};
use folio_search::{SearchConfig, SemanticSearch};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const TERMINATION_QUERY: &str = "What is the termination clause?";

fn contract_chunks() -> Vec<Chunk> {
    vec![
        Chunk::new(
            "c-12",
            "contract",
            "Either party may terminate this agreement with ninety days written notice.",
            12,
            vec![0.95, 0.05, 0.0, 0.0],
        ),
        Chunk::new(
            "c-13",
            "contract",
            "Termination for cause takes effect immediately upon notice.",
            13,
            vec![0.8, 0.2, 0.1, 0.0],
        ),
        Chunk::new(
            "c-02",
            "contract",
            "The supplier shall invoice monthly in arrears.",
            2,
            vec![0.1, 0.9, 0.0, 0.0],
        ),
        Chunk::new(
            "c-30",
            "contract",
            "Schedule B lists the approved subcontractors.",
            30,
            vec![0.0, 0.0, 0.0, 1.0],
        ),
    ]
}

fn session(backend: MockChatBackend) -> (Arc<MockChatBackend>, Arc<ChatSession>) {
    let embedder = MockEmbedder::new(4).with_vector(TERMINATION_QUERY, vec![1.0, 0.0, 0.0, 0.0]);
    let search = SemanticSearch::new(
        Arc::new(embedder),
        Arc::new(InMemoryChunkStore::with_chunks(contract_chunks())),
        Arc::new(SemanticCache::new(SemanticCacheConfig::default())),
        SearchConfig::default(),
    );
    let backend = Arc::new(backend);
    let config = OrchestratorConfig {
        model_loading_backoff: Duration::from_millis(1),
        ..OrchestratorConfig::default()
    };
    let pipeline = RagPipeline::new(Arc::new(search), backend.clone(), config).unwrap();
    (backend, Arc::new(ChatSession::new(Arc::new(pipeline))))
}

async fn send(session: &ChatSession, request: ChatRequest) -> (ChatMessage, Vec<MessageUpdate>) {
    let (tx, mut rx) = mpsc::channel(128);
    let message = session.send_message(request, tx).await;
    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        updates.push(update);
    }
    (message, updates)
}

#[test]
fn scenario_a_greeting_without_documents() {
    let (backend, session) = session(MockChatBackend::new());

    let (message, updates) = tokio_test::block_on(send(&session, ChatRequest::new("Hi")));

    let classification = &message.classification;
    assert_eq!(classification.query_type, QueryType::Conversational);
    assert_eq!(classification.complexity, Complexity::Simple);
    assert_eq!(classification.retrieval_mode, RetrievalMode::NoRetrieval);

    assert_eq!(message.state, MessageState::Completed);
    assert!(message.sources.is_empty());
    assert_eq!(message.content, "Mock answer.");

    let calls = tokio_test::block_on(backend.stream_calls());
    let prompt = &calls[0];
    assert_eq!(prompt[0].role, Role::System);
    assert!(!prompt[0].content.contains("[Source"));
    assert_eq!(prompt.last().unwrap().content, "Hi");
    assert_eq!(backend.chat_calls(), 0);

    assert_eq!(updates.last().unwrap().state, MessageState::Completed);
}

#[tokio::test]
async fn scenario_b_factual_question_with_document() {
    let (backend, session) = session(MockChatBackend::new());
    let request = ChatRequest::new(TERMINATION_QUERY).with_documents(["contract"]);

    let (message, updates) = send(&session, request).await;

    let classification = &message.classification;
    assert_ne!(classification.retrieval_mode, RetrievalMode::NoRetrieval);
    assert_eq!(classification.query_type, QueryType::Factual);

    let strategy = RetrievalStrategy::select(classification.query_type, classification.retrieval_mode);
    assert!(!message.sources.is_empty());
    assert!(message.sources.len() <= strategy.top_k);
    for source in &message.sources {
        assert!(source.similarity >= strategy.min_similarity);
    }
    for pair in message.sources.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    let source_ids: Vec<&str> = message.sources.iter().map(|s| s.chunk.id.as_str()).collect();
    assert_eq!(source_ids, vec!["c-12", "c-13"]);

    // Context is built from the returned chunks only
    let calls = backend.stream_calls().await;
    let system = &calls[0][0].content;
    assert!(system.contains("[Source 1, Page 12]"));
    assert!(system.contains("[Source 2, Page 13]"));
    assert!(!system.contains("invoice monthly"));
    assert!(!system.contains("subcontractors"));

    let final_update = updates.last().unwrap();
    assert_eq!(final_update.state, MessageState::Completed);
    assert_eq!(final_update.sources.as_ref().map(Vec::len), Some(2));
    assert!(final_update.metrics.is_some());
}

#[tokio::test]
async fn scenario_c_new_message_aborts_streaming_one() {
    let (_, session) = session(MockChatBackend::new().with_scripts(vec![
        StreamScript::Hang(vec!["The first answer".into()]),
        StreamScript::tokens(&["Second answer."]),
    ]));

    let (first_tx, mut first_rx) = mpsc::channel(16);
    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.send_message(ChatRequest::new("Hi"), first_tx).await })
    };

    let streaming = first_rx.recv().await.unwrap();
    assert_eq!(streaming.state, MessageState::Streaming);
    assert!(session.is_generating());

    let (second, _) = send(&session, ChatRequest::new("Hello again")).await;
    let first = tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.state, MessageState::Aborted);
    assert!(first.error.is_none());
    assert_eq!(first.content, "The first answer");
    assert!(first.sources.is_empty());
    assert!(first.metrics.is_none());

    let aborted_update = first_rx.recv().await.unwrap();
    assert_eq!(aborted_update.state, MessageState::Aborted);
    assert!(!aborted_update.is_streaming);

    assert_eq!(second.state, MessageState::Completed);
    assert_eq!(second.content, "Second answer.");
    assert!(!session.is_generating());
}
