//! services/api/src/web/state.rs
//!
//! Defines the application's shared state, created once at startup and
//! passed to all handlers.

use std::sync::Arc;

use rag_agent_core::orchestrator::QueryOrchestrator;
use rag_agent_core::ports::ConversationStore;

use crate::adapters::EmbeddingRetriever;
use crate::config::Config;

/// The shared application state.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ConversationStore>,
    /// Kept concrete: the ingest endpoint needs the index entry point,
    /// which is not part of the `Retriever` port.
    pub retriever: Arc<EmbeddingRetriever>,
    pub orchestrator: Arc<QueryOrchestrator>,
}
