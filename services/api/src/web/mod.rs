pub mod chat;
pub mod dto;
pub mod rest;
pub mod state;

pub use chat::{chat_handler, chat_stream_handler, ingest_documents_handler};
pub use rest::{
    create_session_handler, delete_session_handler, get_session_handler, health_handler,
    list_sessions_handler, root_handler, update_session_handler,
};
pub use state::AppState;
