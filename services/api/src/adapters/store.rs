//! services/api/src/adapters/store.rs
//!
//! This module contains the database adapter, which is the concrete
//! implementation of the `ConversationStore` port from the `core` crate.
//! It handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rag_agent_core::domain::{
    Message, RetrievedDocument, Role, Session, SessionStatus, SessionSummary, TokenUsage,
};
use rag_agent_core::ports::{ChatError, ChatResult, ConversationStore};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ConversationStore` port.
#[derive(Clone)]
pub struct SqlxConversationStore {
    pool: PgPool,
}

impl SqlxConversationStore {
    /// Creates a new `SqlxConversationStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn messages_for_session(&self, session_id: Uuid) -> ChatResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, session_id, role, content, created_at, \
             input_tokens, output_tokens, rag_tokens, total_tokens, rag_references \
             FROM messages WHERE session_id = $1 ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        records.into_iter().map(MessageRecord::into_domain).collect()
    }
}

fn persistence(e: sqlx::Error) -> ChatError {
    ChatError::Persistence(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    title: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    is_active: bool,
}

impl SessionRecord {
    fn into_domain(self) -> Session {
        Session {
            id: self.id,
            title: self.title,
            created_at: self.created_at,
            updated_at: self.updated_at,
            status: SessionStatus::from_active_flag(self.is_active),
            messages: Vec::new(),
        }
    }
}

#[derive(FromRow)]
struct SessionSummaryRecord {
    id: Uuid,
    title: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    is_active: bool,
    message_count: i64,
}

impl SessionSummaryRecord {
    fn into_domain(self) -> SessionSummary {
        SessionSummary {
            session: Session {
                id: self.id,
                title: self.title,
                created_at: self.created_at,
                updated_at: self.updated_at,
                status: SessionStatus::from_active_flag(self.is_active),
                messages: Vec::new(),
            },
            message_count: self.message_count,
        }
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    session_id: Uuid,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
    rag_tokens: Option<i64>,
    total_tokens: Option<i64>,
    rag_references: Option<serde_json::Value>,
}

impl MessageRecord {
    fn into_domain(self) -> ChatResult<Message> {
        let role = Role::parse(&self.role).ok_or_else(|| {
            ChatError::Persistence(format!("message {} has unknown role '{}'", self.id, self.role))
        })?;

        let references = match self.rag_references {
            Some(value) => Some(
                serde_json::from_value::<Vec<RetrievedDocument>>(value).map_err(|e| {
                    ChatError::Persistence(format!(
                        "message {} has undecodable references: {}",
                        self.id, e
                    ))
                })?,
            ),
            None => None,
        };

        Ok(Message {
            id: self.id,
            session_id: self.session_id,
            role,
            content: self.content,
            created_at: self.created_at,
            token_usage: TokenUsage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
                rag_tokens: self.rag_tokens,
                total_tokens: self.total_tokens,
            },
            references,
        })
    }
}

//=========================================================================================
// `ConversationStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ConversationStore for SqlxConversationStore {
    async fn create_session(&self, session: &Session) -> ChatResult<Session> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "INSERT INTO sessions (id, title, created_at, updated_at, is_active) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, title, created_at, updated_at, is_active",
        )
        .bind(session.id)
        .bind(&session.title)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.status.is_active())
        .fetch_one(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(record.into_domain())
    }

    async fn get_session(&self, id: Uuid, include_messages: bool) -> ChatResult<Option<Session>> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "SELECT id, title, created_at, updated_at, is_active FROM sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;

        let Some(record) = record else {
            return Ok(None);
        };

        let mut session = record.into_domain();
        if include_messages {
            session.messages = self.messages_for_session(id).await?;
        }
        Ok(Some(session))
    }

    async fn list_sessions(&self) -> ChatResult<Vec<SessionSummary>> {
        let records = sqlx::query_as::<_, SessionSummaryRecord>(
            "SELECT s.id, s.title, s.created_at, s.updated_at, s.is_active, \
             COUNT(m.id) AS message_count \
             FROM sessions s LEFT JOIN messages m ON m.session_id = s.id \
             WHERE s.is_active \
             GROUP BY s.id \
             ORDER BY s.updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(records
            .into_iter()
            .map(SessionSummaryRecord::into_domain)
            .collect())
    }

    async fn update_session(&self, session: &Session) -> ChatResult<Option<Session>> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "UPDATE sessions SET title = $1, is_active = $2, updated_at = $3 WHERE id = $4 \
             RETURNING id, title, created_at, updated_at, is_active",
        )
        .bind(&session.title)
        .bind(session.status.is_active())
        .bind(session.updated_at)
        .bind(session.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(record.map(SessionRecord::into_domain))
    }

    async fn deactivate_session(&self, id: Uuid) -> ChatResult<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_message(&self, message: &Message) -> ChatResult<Message> {
        let references = message
            .references
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ChatError::Persistence(format!("unencodable references: {e}")))?;

        let record = sqlx::query_as::<_, MessageRecord>(
            "INSERT INTO messages \
             (id, session_id, role, content, created_at, \
              input_tokens, output_tokens, rag_tokens, total_tokens, rag_references) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING id, session_id, role, content, created_at, \
             input_tokens, output_tokens, rag_tokens, total_tokens, rag_references",
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .bind(message.token_usage.input_tokens)
        .bind(message.token_usage.output_tokens)
        .bind(message.token_usage.rag_tokens)
        .bind(message.token_usage.total_tokens)
        .bind(references)
        .fetch_one(&self.pool)
        .await
        .map_err(persistence)?;

        record.into_domain()
    }
}
