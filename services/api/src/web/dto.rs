//! services/api/src/web/dto.rs
//!
//! Request and response payloads for the REST API, with conversions from
//! the core domain types.

use chrono::{DateTime, Utc};
use rag_agent_core::domain::{Message, RetrievedDocument, Session, SessionSummary, TokenUsage};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Session DTOs
//=========================================================================================

/// Payload for creating a session.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SessionCreate {
    pub title: String,
}

/// Payload for updating a session. Omitted fields are left unchanged.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SessionUpdate {
    pub title: Option<String>,
    pub is_active: Option<bool>,
}

/// A session in list and create responses.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<i64>,
}

impl SessionResponse {
    pub fn from_session(session: &Session, message_count: Option<i64>) -> Self {
        Self {
            id: session.id,
            title: session.title.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            is_active: session.status.is_active(),
            message_count,
        }
    }
}

impl From<SessionSummary> for SessionResponse {
    fn from(summary: SessionSummary) -> Self {
        Self::from_session(&summary.session, Some(summary.message_count))
    }
}

/// A session with its full message history.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionDetailResponse {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub message_count: i64,
    pub messages: Vec<MessageResponse>,
}

impl From<Session> for SessionDetailResponse {
    fn from(session: Session) -> Self {
        let messages: Vec<MessageResponse> =
            session.messages.iter().map(MessageResponse::from).collect();
        Self {
            id: session.id,
            title: session.title,
            created_at: session.created_at,
            updated_at: session.updated_at,
            is_active: session.status.is_active(),
            message_count: messages.len() as i64,
            messages,
        }
    }
}

//=========================================================================================
// Message and Chat DTOs
//=========================================================================================

/// Token usage counters; absent counters were unknown upstream.
#[derive(Debug, Serialize, ToSchema)]
pub struct TokenUsageDto {
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub rag_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
}

impl From<TokenUsage> for TokenUsageDto {
    fn from(usage: TokenUsage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            rag_tokens: usage.rag_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// A retrieved reference document attached to an assistant message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReferenceDocumentDto {
    pub source: Option<String>,
    pub content: String,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f32>,
}

impl From<&RetrievedDocument> for ReferenceDocumentDto {
    fn from(document: &RetrievedDocument) -> Self {
        Self {
            source: document.source.clone(),
            content: document.content.clone(),
            metadata: serde_json::Value::Object(document.metadata.clone()),
            similarity_score: document.similarity_score,
        }
    }
}

/// A chat message in API responses.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsageDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<ReferenceDocumentDto>>,
}

impl From<&Message> for MessageResponse {
    fn from(message: &Message) -> Self {
        let token_usage = if message.token_usage.is_empty() {
            None
        } else {
            Some(TokenUsageDto::from(message.token_usage))
        };
        let references = message
            .references
            .as_ref()
            .map(|refs| refs.iter().map(ReferenceDocumentDto::from).collect());

        Self {
            id: message.id,
            session_id: message.session_id,
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            created_at: message.created_at,
            token_usage,
            references,
        }
    }
}

/// Payload for both chat endpoints.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<Uuid>,
}

/// The batch chat response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChatResponse {
    pub session_id: Uuid,
    pub message: MessageResponse,
}

/// Response of the manual ingestion trigger.
#[derive(Debug, Serialize, ToSchema)]
pub struct IngestResponse {
    pub message: String,
    pub documents_ingested: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_agent_core::domain::Role;

    #[test]
    fn unknown_usage_is_omitted_from_the_message_response() {
        let message = Message::user(Uuid::new_v4(), "hi");
        let response = MessageResponse::from(&message);

        assert!(response.token_usage.is_none());
        assert!(response.references.is_none());
        assert_eq!(response.role, Role::User.as_str());
    }

    #[test]
    fn known_usage_survives_the_conversion() {
        let usage = TokenUsage {
            rag_tokens: Some(7),
            ..TokenUsage::default()
        };
        let message = Message::assistant(Uuid::new_v4(), "answer", usage, None);
        let response = MessageResponse::from(&message);

        let usage = response.token_usage.unwrap();
        assert_eq!(usage.rag_tokens, Some(7));
        assert_eq!(usage.input_tokens, None);
    }
}
