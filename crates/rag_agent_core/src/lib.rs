pub mod context;
pub mod domain;
pub mod events;
pub mod orchestrator;
pub mod ports;
pub mod title;

pub use domain::{Message, RetrievedDocument, Role, Session, SessionStatus, SessionSummary, TokenUsage};
pub use events::{EventEncoder, TurnEvent, WireEvent};
pub use orchestrator::{QueryOrchestrator, TurnOutcome};
pub use ports::{ChatError, ChatResult, ConversationStore, GenerationOutput, GenerationStream, Generator, Retriever};
