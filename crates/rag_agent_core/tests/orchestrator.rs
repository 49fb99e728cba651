//! Integration tests for the turn pipeline, driven against in-memory
//! implementations of the store, retriever and generator ports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use uuid::Uuid;

use rag_agent_core::context::GenerationRequest;
use rag_agent_core::domain::{Message, RetrievedDocument, Role, Session, SessionSummary};
use rag_agent_core::events::TurnEvent;
use rag_agent_core::orchestrator::QueryOrchestrator;
use rag_agent_core::ports::{
    ChatError, ChatResult, ConversationStore, GenerationOutput, GenerationStream, Generator,
    Retriever,
};

//=========================================================================================
// In-memory stub ports
//=========================================================================================

#[derive(Default)]
struct MemoryStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    messages: Mutex<Vec<Message>>,
    fail_message_writes: AtomicBool,
    fail_assistant_writes: AtomicBool,
}

impl MemoryStore {
    fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    fn session(&self, id: Uuid) -> Option<Session> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_session(&self, session: &Session) -> ChatResult<Session> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(session.clone())
    }

    async fn get_session(&self, id: Uuid, include_messages: bool) -> ChatResult<Option<Session>> {
        let Some(mut session) = self.sessions.lock().unwrap().get(&id).cloned() else {
            return Ok(None);
        };
        if include_messages {
            session.messages = self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.session_id == id)
                .cloned()
                .collect();
        }
        Ok(Some(session))
    }

    async fn list_sessions(&self) -> ChatResult<Vec<SessionSummary>> {
        let messages = self.messages.lock().unwrap();
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status.is_active())
            .map(|s| SessionSummary {
                session: s.clone(),
                message_count: messages.iter().filter(|m| m.session_id == s.id).count() as i64,
            })
            .collect())
    }

    async fn update_session(&self, session: &Session) -> ChatResult<Option<Session>> {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(stored) = sessions.get_mut(&session.id) else {
            return Ok(None);
        };
        stored.title = session.title.clone();
        stored.status = session.status;
        stored.updated_at = session.updated_at;
        Ok(Some(stored.clone()))
    }

    async fn deactivate_session(&self, id: Uuid) -> ChatResult<bool> {
        Ok(self.sessions.lock().unwrap().contains_key(&id))
    }

    async fn create_message(&self, message: &Message) -> ChatResult<Message> {
        if self.fail_message_writes.load(Ordering::SeqCst) {
            return Err(ChatError::Persistence("write refused".to_string()));
        }
        if message.role == Role::Assistant && self.fail_assistant_writes.load(Ordering::SeqCst) {
            return Err(ChatError::Persistence("assistant write refused".to_string()));
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(message.clone())
    }
}

struct StubRetriever {
    documents: Vec<RetrievedDocument>,
    fail: bool,
    calls: AtomicUsize,
}

impl StubRetriever {
    fn with_documents(documents: Vec<RetrievedDocument>) -> Self {
        Self {
            documents,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            documents: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Retriever for StubRetriever {
    async fn search(&self, _query: &str) -> ChatResult<Vec<RetrievedDocument>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ChatError::Retrieval("index unavailable".to_string()));
        }
        Ok(self.documents.clone())
    }
}

#[derive(Default)]
struct StubGenerator {
    answer: String,
    deltas: Vec<String>,
    fail: bool,
    fail_stream_after: Option<usize>,
    delta_delay: Option<Duration>,
    calls: AtomicUsize,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl StubGenerator {
    fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            deltas: answer
                .split_inclusive(' ')
                .map(str::to_string)
                .collect(),
            ..Self::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Generator for StubGenerator {
    async fn generate(&self, request: &GenerationRequest) -> ChatResult<GenerationOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if self.fail {
            return Err(ChatError::Generation("model unavailable".to_string()));
        }
        Ok(GenerationOutput {
            text: self.answer.clone(),
            usage: Default::default(),
        })
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> ChatResult<GenerationStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if self.fail {
            return Err(ChatError::Generation("model unavailable".to_string()));
        }
        let deltas = self.deltas.clone();
        let fail_after = self.fail_stream_after;
        let delay = self.delta_delay;
        Ok(Box::pin(async_stream::stream! {
            for (i, delta) in deltas.into_iter().enumerate() {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if Some(i) == fail_after {
                    yield Err(ChatError::Generation("model dropped mid-answer".to_string()));
                    return;
                }
                yield Ok(delta);
            }
        }))
    }
}

//=========================================================================================
// Fixture helpers
//=========================================================================================

fn passage(source: &str, content: &str) -> RetrievedDocument {
    RetrievedDocument {
        source: Some(source.to_string()),
        content: content.to_string(),
        metadata: serde_json::Map::new(),
        similarity_score: Some(0.8),
    }
}

fn orchestrator(
    store: &Arc<MemoryStore>,
    retriever: StubRetriever,
    generator: StubGenerator,
) -> (QueryOrchestrator, Arc<StubRetriever>, Arc<StubGenerator>) {
    let retriever = Arc::new(retriever);
    let generator = Arc::new(generator);
    let orchestrator = QueryOrchestrator::new(
        Arc::clone(store) as Arc<dyn ConversationStore>,
        Arc::clone(&retriever) as Arc<dyn Retriever>,
        Arc::clone(&generator) as Arc<dyn Generator>,
    );
    (orchestrator, retriever, generator)
}

//=========================================================================================
// Batch mode
//=========================================================================================

#[tokio::test]
async fn batch_turn_persists_user_and_assistant_messages() {
    let store = Arc::new(MemoryStore::default());
    let passages = vec![
        passage("x.md", &"a".repeat(120)),
        passage("y.md", &"b".repeat(81)),
    ];
    let (orchestrator, _, _) = orchestrator(
        &store,
        StubRetriever::with_documents(passages),
        StubGenerator::answering("X is a thing."),
    );

    let outcome = orchestrator.run_turn(None, "What is X?").await.unwrap();

    let messages = store.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "What is X?");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "X is a thing.");

    // (120 + 81) / 4, floored.
    assert_eq!(messages[1].token_usage.rag_tokens, Some(50));
    assert_eq!(messages[1].references.as_ref().unwrap().len(), 2);

    // The immediate response carries the full passages, not previews.
    assert_eq!(outcome.references.len(), 2);
    assert_eq!(outcome.references[0].content.len(), 120);
    assert_eq!(outcome.message.role, Role::Assistant);
}

#[tokio::test]
async fn batch_generation_failure_leaves_only_the_user_message() {
    let store = Arc::new(MemoryStore::default());
    let (orchestrator, _, _) = orchestrator(
        &store,
        StubRetriever::with_documents(vec![passage("x.md", "context")]),
        StubGenerator::failing(),
    );

    let err = orchestrator.run_turn(None, "What is X?").await.unwrap_err();
    assert!(matches!(err, ChatError::Generation(_)));

    let messages = store.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn unknown_session_id_starts_a_fresh_conversation() {
    let store = Arc::new(MemoryStore::default());
    let (orchestrator, _, _) = orchestrator(
        &store,
        StubRetriever::with_documents(Vec::new()),
        StubGenerator::answering("answer"),
    );

    let outcome = orchestrator
        .run_turn(Some(Uuid::new_v4()), "hello")
        .await
        .unwrap();

    let session = store.session(outcome.session_id).unwrap();
    assert_eq!(session.title, "hello");
    assert!(session.status.is_active());
}

#[tokio::test]
async fn title_reflects_the_latest_turn() {
    let store = Arc::new(MemoryStore::default());
    let (orchestrator, _, generator) = orchestrator(
        &store,
        StubRetriever::with_documents(Vec::new()),
        StubGenerator::answering("answer"),
    );

    let first = orchestrator.run_turn(None, "first question").await.unwrap();
    orchestrator
        .run_turn(Some(first.session_id), "second question")
        .await
        .unwrap();

    let session = store.session(first.session_id).unwrap();
    assert_eq!(session.title, "second question");
    assert!(session.updated_at >= session.created_at);

    // The second request saw the first exchange as history, not the new
    // question itself.
    let request = generator.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(request.history.len(), 2);
    assert_eq!(request.history[0].content, "first question");
    assert_eq!(request.history[1].content, "answer");
    assert_eq!(request.question, "second question");
}

#[tokio::test]
async fn user_write_failure_aborts_before_retrieval_and_generation() {
    let store = Arc::new(MemoryStore::default());
    store.fail_message_writes.store(true, Ordering::SeqCst);
    let (orchestrator, retriever, generator) = orchestrator(
        &store,
        StubRetriever::with_documents(vec![passage("x.md", "context")]),
        StubGenerator::answering("answer"),
    );

    let err = orchestrator.run_turn(None, "What is X?").await.unwrap_err();
    assert!(matches!(err, ChatError::Persistence(_)));
    assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_message_is_rejected_without_touching_the_store() {
    let store = Arc::new(MemoryStore::default());
    let (orchestrator, _, _) = orchestrator(
        &store,
        StubRetriever::with_documents(Vec::new()),
        StubGenerator::answering("answer"),
    );

    let err = orchestrator.run_turn(None, "").await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert!(store.messages().is_empty());
    assert!(store.sessions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn session_reads_are_idempotent() {
    let store = Arc::new(MemoryStore::default());
    let (orchestrator, _, _) = orchestrator(
        &store,
        StubRetriever::with_documents(Vec::new()),
        StubGenerator::answering("answer"),
    );
    let outcome = orchestrator.run_turn(None, "hello").await.unwrap();

    let first = store.get_session(outcome.session_id, true).await.unwrap().unwrap();
    let second = store.get_session(outcome.session_id, true).await.unwrap().unwrap();

    assert_eq!(first.title, second.title);
    assert_eq!(first.updated_at, second.updated_at);
    assert_eq!(first.messages.len(), second.messages.len());
}

//=========================================================================================
// Streaming mode
//=========================================================================================

#[tokio::test]
async fn stream_emits_references_and_usage_once_and_ends_with_done() {
    let store = Arc::new(MemoryStore::default());
    let passages = vec![passage("x.md", &"a".repeat(40))];
    let (orchestrator, _, _) = orchestrator(
        &store,
        StubRetriever::with_documents(passages),
        StubGenerator::answering("the full answer"),
    );

    let events: Vec<TurnEvent> = orchestrator
        .stream_turn(None, "What is X?")
        .await
        .unwrap()
        .collect()
        .await;

    let mut content = String::new();
    let mut references = 0;
    let mut usages = 0;
    let mut terminals = 0;
    for event in &events {
        match event {
            TurnEvent::Content(chunk) => content.push_str(chunk),
            TurnEvent::References(docs) => {
                references += 1;
                assert_eq!(docs.len(), 1);
            }
            TurnEvent::Usage(usage) => {
                usages += 1;
                assert_eq!(usage.rag_tokens, Some(10));
            }
            TurnEvent::Done | TurnEvent::Error(_) => terminals += 1,
        }
    }
    assert_eq!(content, "the full answer");
    assert_eq!(references, 1);
    assert_eq!(usages, 1);
    assert_eq!(terminals, 1);
    assert!(matches!(events.last(), Some(TurnEvent::Done)));

    // Persistence completed before the terminal event was observed.
    let messages = store.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "the full answer");
    assert_eq!(messages[1].token_usage.rag_tokens, Some(10));
}

#[tokio::test]
async fn stream_generation_failure_ends_with_error_and_no_assistant_message() {
    let store = Arc::new(MemoryStore::default());
    let mut generator = StubGenerator::answering("partial answer streamed");
    generator.fail_stream_after = Some(2);
    let (orchestrator, _, _) = orchestrator(
        &store,
        StubRetriever::with_documents(vec![passage("x.md", "context")]),
        generator,
    );

    let events: Vec<TurnEvent> = orchestrator
        .stream_turn(None, "What is X?")
        .await
        .unwrap()
        .collect()
        .await;

    assert!(matches!(events.last(), Some(TurnEvent::Error(_))));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, TurnEvent::Done | TurnEvent::Error(_)))
            .count(),
        1
    );

    let messages = store.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn stream_retrieval_failure_surfaces_before_any_event() {
    let store = Arc::new(MemoryStore::default());
    let (orchestrator, _, generator) =
        orchestrator(&store, StubRetriever::failing(), StubGenerator::answering("answer"));

    let err = orchestrator
        .stream_turn(None, "What is X?")
        .await
        .err()
        .expect("expected retrieval error");
    assert!(matches!(err, ChatError::Retrieval(_)));

    // The user message was already durable; generation never started.
    assert_eq!(store.messages().len(), 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stream_assistant_write_failure_ends_with_error() {
    let store = Arc::new(MemoryStore::default());
    store.fail_assistant_writes.store(true, Ordering::SeqCst);
    let (orchestrator, _, _) = orchestrator(
        &store,
        StubRetriever::with_documents(Vec::new()),
        StubGenerator::answering("answer"),
    );

    let events: Vec<TurnEvent> = orchestrator
        .stream_turn(None, "What is X?")
        .await
        .unwrap()
        .collect()
        .await;

    // Content was delivered, then the divergence surfaced as the terminal
    // event; only the user message is durable.
    assert!(events.iter().any(|e| matches!(e, TurnEvent::Content(_))));
    assert!(matches!(events.last(), Some(TurnEvent::Error(_))));
    assert_eq!(store.messages().len(), 1);
}

#[tokio::test]
async fn consumer_disconnect_does_not_stop_generation_or_persistence() {
    let store = Arc::new(MemoryStore::default());
    let mut generator = StubGenerator::answering("a long answer in several parts");
    generator.delta_delay = Some(Duration::from_millis(5));
    let (orchestrator, _, _) = orchestrator(
        &store,
        StubRetriever::with_documents(vec![passage("x.md", "context")]),
        generator,
    );

    let mut events = Box::pin(orchestrator.stream_turn(None, "What is X?").await.unwrap());
    assert!(events.next().await.is_some());
    drop(events);

    // Fire-to-completion: the spawned turn keeps running and persists the
    // whole exchange even though nobody is listening.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let messages = store.messages();
        if messages.len() == 2 {
            assert_eq!(messages[1].content, "a long answer in several parts");
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "assistant message was never persisted");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
