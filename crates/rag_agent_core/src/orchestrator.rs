//! crates/rag_agent_core/src/orchestrator.rs
//!
//! The per-turn pipeline: session resolution, retrieval, generation, usage
//! accounting and durable persistence of the exchange, in batch and
//! streaming form.
//!
//! Ordering guarantees, both modes:
//! - the user message is committed before retrieval starts, so the user's
//!   utterance survives any later failure;
//! - the assistant message is written only after generation has fully
//!   succeeded, never incrementally, so a failed turn leaves at most the
//!   user message behind.
//!
//! Known limitation: turns on the *same* session are not serialized. Two
//! concurrent turns can interleave their message writes and title updates;
//! each individual write stays atomic.

use std::sync::Arc;

use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::{self, GenerationRequest};
use crate::domain::{Message, RetrievedDocument, Session, TokenUsage};
use crate::events::TurnEvent;
use crate::ports::{ChatError, ChatResult, ConversationStore, Generator, Retriever};
use crate::title::derive_title;

/// Stored reference previews are capped to this many characters to bound
/// per-message storage; the full passages still go out with the response.
const REFERENCE_PREVIEW_CHARS: usize = 200;

/// The result of a completed batch turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub session_id: Uuid,
    /// The persisted assistant message (its stored references are previews).
    pub message: Message,
    /// The full, untruncated retrieved documents for the immediate response.
    pub references: Vec<RetrievedDocument>,
}

/// Executes conversational turns end-to-end against injected collaborators.
pub struct QueryOrchestrator {
    store: Arc<dyn ConversationStore>,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
}

impl QueryOrchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            store,
            retriever,
            generator,
        }
    }

    /// Runs one turn in batch mode: the full answer is generated, persisted
    /// and returned in one piece.
    pub async fn run_turn(
        &self,
        session_id: Option<Uuid>,
        user_text: &str,
    ) -> ChatResult<TurnOutcome> {
        let (mut session, documents, request) = self.prepare_turn(session_id, user_text).await?;

        let output = self.generator.generate(&request).await?;

        let mut usage = output.usage;
        usage.rag_tokens = Some(estimate_rag_tokens(&documents));

        let assistant = Message::assistant(
            session.id,
            output.text,
            usage,
            Some(reference_snapshot(&documents)),
        );
        let assistant = self.store.create_message(&assistant).await.map_err(|e| {
            error!(session_id = %session.id, error = %e, "assistant message not persisted after generation");
            e
        })?;

        session.title = derive_title(user_text);
        session.updated_at = Utc::now();
        self.store.update_session(&session).await?;

        info!(session_id = %session.id, "chat turn completed");
        Ok(TurnOutcome {
            session_id: session.id,
            message: assistant,
            references: documents,
        })
    }

    /// Runs one turn in streaming mode, yielding [`TurnEvent`]s as the
    /// answer is generated.
    ///
    /// Each text delta is emitted as soon as the generator produces it; the
    /// first delta is followed by the references and the retrieval-usage
    /// estimate, each sent exactly once. The assistant message is persisted
    /// only after the generator's delta sequence ends, and the stream then
    /// closes with a single terminal event.
    ///
    /// Disconnect policy: fire-to-completion. Generation and persistence run
    /// in a spawned task, so dropping the returned stream does not stop the
    /// generator or prevent the exchange from being persisted.
    ///
    /// Errors before the first event (validation, session or user-message
    /// persistence, retrieval) are returned as `Err` instead; the transport
    /// layer turns them into the terminal `error` event.
    pub async fn stream_turn(
        &self,
        session_id: Option<Uuid>,
        user_text: &str,
    ) -> ChatResult<impl Stream<Item = TurnEvent> + Send> {
        let (session, documents, request) = self.prepare_turn(session_id, user_text).await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let store = Arc::clone(&self.store);
        let generator = Arc::clone(&self.generator);
        let user_text = user_text.to_string();
        tokio::spawn(async move {
            drive_generation(store, generator, session, documents, request, user_text, tx).await;
        });

        Ok(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        })
    }

    /// Steps shared by both modes: validate, resolve or create the session,
    /// commit the user message, retrieve, and assemble the request.
    async fn prepare_turn(
        &self,
        session_id: Option<Uuid>,
        user_text: &str,
    ) -> ChatResult<(Session, Vec<RetrievedDocument>, GenerationRequest)> {
        if user_text.is_empty() {
            return Err(ChatError::Validation("message must not be empty".to_string()));
        }

        // A missing or unknown session id both start a fresh conversation.
        let existing = match session_id {
            Some(id) => self.store.get_session(id, true).await?,
            None => None,
        };
        let session = match existing {
            Some(session) => session,
            None => {
                let session = Session::new(derive_title(user_text));
                info!(session_id = %session.id, "created session for chat turn");
                self.store.create_session(&session).await?
            }
        };

        // The user's utterance becomes durable before any retrieval or
        // generation cost is spent.
        let user_message = Message::user(session.id, user_text);
        self.store.create_message(&user_message).await?;

        let documents = self.retriever.search(user_text).await?;

        // History is the log as loaded, without the message just written.
        let request = context::assemble(&documents, &session.messages, user_text);
        Ok((session, documents, request))
    }
}

/// Drives the generator to exhaustion and persists the exchange, forwarding
/// events to the consumer as long as it is listening. Send failures mean the
/// consumer went away; the turn still runs to completion.
async fn drive_generation(
    store: Arc<dyn ConversationStore>,
    generator: Arc<dyn Generator>,
    mut session: Session,
    documents: Vec<RetrievedDocument>,
    request: GenerationRequest,
    user_text: String,
    tx: mpsc::UnboundedSender<TurnEvent>,
) {
    let send = |event: TurnEvent| {
        let _ = tx.send(event);
    };

    let mut deltas = match generator.generate_stream(&request).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(session_id = %session.id, error = %e, "streaming generation failed to start");
            send(TurnEvent::Error(e.to_string()));
            return;
        }
    };

    let usage = TokenUsage {
        rag_tokens: Some(estimate_rag_tokens(&documents)),
        ..TokenUsage::default()
    };

    let mut answer = String::new();
    let mut opening_sent = false;
    while let Some(delta) = deltas.next().await {
        match delta {
            Ok(chunk) => {
                answer.push_str(&chunk);
                send(TurnEvent::Content(chunk));
                if !opening_sent {
                    send(TurnEvent::References(documents.clone()));
                    send(TurnEvent::Usage(usage));
                    opening_sent = true;
                }
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "generation failed mid-stream");
                send(TurnEvent::Error(e.to_string()));
                return;
            }
        }
    }

    // Persistence happens only after the delta sequence is exhausted.
    let assistant = Message::assistant(
        session.id,
        answer,
        usage,
        Some(reference_snapshot(&documents)),
    );
    if let Err(e) = store.create_message(&assistant).await {
        // Distinct, monitorable condition: the caller saw the answer but the
        // store has no durable assistant message for it.
        error!(
            session_id = %session.id,
            error = %e,
            "assistant message not persisted after streamed delivery"
        );
        send(TurnEvent::Error(e.to_string()));
        return;
    }

    session.title = derive_title(&user_text);
    session.updated_at = Utc::now();
    if let Err(e) = store.update_session(&session).await {
        warn!(session_id = %session.id, error = %e, "session refresh failed after streamed turn");
        send(TurnEvent::Error(e.to_string()));
        return;
    }

    info!(session_id = %session.id, "streamed chat turn completed");
    send(TurnEvent::Done);
}

/// Retrieval token estimate: total passage characters divided by four.
/// A deterministic approximation, not a tokenizer result.
pub fn estimate_rag_tokens(documents: &[RetrievedDocument]) -> i64 {
    let total_chars: usize = documents.iter().map(|d| d.content.chars().count()).sum();
    (total_chars / 4) as i64
}

/// Builds the stored form of the references: source and metadata kept,
/// passage text capped to a preview.
fn reference_snapshot(documents: &[RetrievedDocument]) -> Vec<RetrievedDocument> {
    documents
        .iter()
        .map(|doc| RetrievedDocument {
            source: doc.source.clone(),
            content: preview(&doc.content),
            metadata: doc.metadata.clone(),
            similarity_score: None,
        })
        .collect()
}

fn preview(content: &str) -> String {
    if content.chars().count() > REFERENCE_PREVIEW_CHARS {
        let mut preview: String = content.chars().take(REFERENCE_PREVIEW_CHARS).collect();
        preview.push_str("...");
        preview
    } else {
        content.to_string()
    }
}
