//! crates/rag_agent_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or transport format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The lifecycle state of a chat session.
///
/// An `Inactive` session is logically deleted: it no longer shows up in
/// listings, but its messages are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Inactive,
}

impl SessionStatus {
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Active)
    }

    pub fn from_active_flag(is_active: bool) -> Self {
        if is_active {
            SessionStatus::Active
        } else {
            SessionStatus::Inactive
        }
    }
}

/// The speaker of a chat message. Fixed at creation, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// Token accounting for a single generation.
///
/// Every counter is optional: upstream generators may not report some
/// figures, and `None` means "unknown", never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub rag_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
}

impl TokenUsage {
    /// True when no counter is known at all.
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none()
            && self.output_tokens.is_none()
            && self.rag_tokens.is_none()
            && self.total_tokens.is_none()
    }
}

/// A passage returned by the retriever: source identifier, passage text,
/// free-form metadata and an optional similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub source: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f32>,
}

/// A single chat message. Messages form an append-only log owned by
/// exactly one session.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub token_usage: TokenUsage,
    pub references: Option<Vec<RetrievedDocument>>,
}

impl Message {
    /// A new user message.
    pub fn user(session_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            token_usage: TokenUsage::default(),
            references: None,
        }
    }

    /// A new assistant message carrying usage counters and a reference snapshot.
    pub fn assistant(
        session_id: Uuid,
        content: impl Into<String>,
        token_usage: TokenUsage,
        references: Option<Vec<RetrievedDocument>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            token_usage,
            references,
        }
    }
}

/// A chat session: a titled, ordered log of messages.
///
/// `messages` holds the conversation in creation order when the session was
/// loaded with history, and is empty otherwise.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub messages: Vec<Message>,
}

impl Session {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            status: SessionStatus::Active,
            messages: Vec::new(),
        }
    }
}

/// A session plus its persisted message count, for list views.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session: Session,
    pub message_count: i64,
}
