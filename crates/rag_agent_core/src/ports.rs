//! crates/rag_agent_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of the retrieval index, the language model, and the
//! database behind them.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::context::GenerationRequest;
use crate::domain::{Message, RetrievedDocument, Session, SessionSummary, TokenUsage};

//=========================================================================================
// Error Taxonomy
//=========================================================================================

/// The error taxonomy shared by the core pipeline and all collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Malformed input from the caller.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The retrieval index failed to answer a query.
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    /// The language model call failed.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// A durable write or read failed.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// A collaborator failed to start up; the capability it backs is degraded.
    #[error("Initialization failed: {0}")]
    Initialization(String),
}

/// A convenience type alias for `Result<T, ChatError>`.
pub type ChatResult<T> = Result<T, ChatError>;

//=========================================================================================
// Collaborator Ports (Traits)
//=========================================================================================

/// Ranked passage retrieval over the document corpus.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Returns candidate passages for `query`, ranked by similarity
    /// descending with ties keeping candidate order. May return an
    /// empty list.
    async fn search(&self, query: &str) -> ChatResult<Vec<RetrievedDocument>>;
}

/// The full answer produced by a batch generation call.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub text: String,
    /// Counters the generator could report; the rest stay unknown.
    pub usage: TokenUsage,
}

/// An ordered sequence of answer text deltas.
pub type GenerationStream = Pin<Box<dyn Stream<Item = ChatResult<String>> + Send>>;

/// Answer generation from an assembled request, batch or streaming.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> ChatResult<GenerationOutput>;

    async fn generate_stream(&self, request: &GenerationRequest) -> ChatResult<GenerationStream>;
}

/// Durable CRUD for sessions and their message logs.
///
/// Each call is its own atomic unit: there are no partial writes, and
/// messages always come back in creation order.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> ChatResult<Session>;

    /// Loads a session by id, with its full message history when
    /// `include_messages` is set. `Ok(None)` when the id is unknown.
    async fn get_session(&self, id: Uuid, include_messages: bool) -> ChatResult<Option<Session>>;

    /// Active sessions, most recently updated first, with message counts.
    async fn list_sessions(&self) -> ChatResult<Vec<SessionSummary>>;

    /// Persists `title`, `status` and a fresh `updated_at` for an existing
    /// session. `Ok(None)` when the id is unknown.
    async fn update_session(&self, session: &Session) -> ChatResult<Option<Session>>;

    /// Soft delete: flips the session to `Inactive`. Returns whether the
    /// session existed. Messages are never removed by this.
    async fn deactivate_session(&self, id: Uuid) -> ChatResult<bool>;

    async fn create_message(&self, message: &Message) -> ChatResult<Message>;
}
