pub mod generation_llm;
pub mod retriever;
pub mod store;

pub use generation_llm::OpenAiGenerator;
pub use retriever::EmbeddingRetriever;
pub use store::SqlxConversationStore;
