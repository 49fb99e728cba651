//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the session management endpoints and the
//! master definition for the OpenAPI specification.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use rag_agent_core::domain::Session;
use rag_agent_core::ports::ChatError;
use serde_json::json;
use tracing::info;
use utoipa::OpenApi;
use uuid::Uuid;

use crate::config::{APP_NAME, APP_VERSION};
use crate::error::ApiError;
use crate::web::dto::{
    ChatRequest, ChatResponse, IngestResponse, MessageResponse, ReferenceDocumentDto,
    SessionCreate, SessionDetailResponse, SessionResponse, SessionUpdate, TokenUsageDto,
};
use crate::web::state::AppState;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_session_handler,
        list_sessions_handler,
        get_session_handler,
        update_session_handler,
        delete_session_handler,
        crate::web::chat::chat_handler,
        crate::web::chat::chat_stream_handler,
        crate::web::chat::ingest_documents_handler,
    ),
    components(
        schemas(
            SessionCreate,
            SessionUpdate,
            SessionResponse,
            SessionDetailResponse,
            MessageResponse,
            TokenUsageDto,
            ReferenceDocumentDto,
            ChatRequest,
            ChatResponse,
            IngestResponse,
        )
    ),
    tags(
        (name = "sessions", description = "Chat session management."),
        (name = "chat", description = "RAG chat, batch and streaming.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Helpers
//=========================================================================================

fn validate_title(title: &str) -> Result<(), ApiError> {
    if title.is_empty() || title.chars().count() > 255 {
        return Err(ChatError::Validation(
            "title must be between 1 and 255 characters".to_string(),
        )
        .into());
    }
    Ok(())
}

fn session_not_found(session_id: Uuid) -> ApiError {
    ChatError::NotFound(format!("Session {} not found", session_id)).into()
}

//=========================================================================================
// Session REST Handlers
//=========================================================================================

/// Create a new chat session.
#[utoipa::path(
    post,
    path = "/api/v1/sessions",
    tag = "sessions",
    request_body = SessionCreate,
    responses(
        (status = 201, description = "Session created successfully", body = SessionResponse),
        (status = 400, description = "Invalid title"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_session_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<SessionCreate>,
) -> Result<impl IntoResponse, ApiError> {
    validate_title(&payload.title)?;
    info!(title = %payload.title, "creating new session");

    let session = app_state
        .store
        .create_session(&Session::new(payload.title))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::from_session(&session, Some(0))),
    ))
}

/// List all active chat sessions, most recently updated first.
#[utoipa::path(
    get,
    path = "/api/v1/sessions",
    tag = "sessions",
    responses(
        (status = 200, description = "Active sessions", body = [SessionResponse]),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_sessions_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    let summaries = app_state.store.list_sessions().await?;
    Ok(Json(summaries.into_iter().map(Into::into).collect()))
}

/// Get a session by ID with all of its messages.
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}",
    tag = "sessions",
    params(("session_id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session detail", body = SessionDetailResponse),
        (status = 404, description = "Session not found"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionDetailResponse>, ApiError> {
    let session = app_state
        .store
        .get_session(session_id, true)
        .await?
        .ok_or_else(|| session_not_found(session_id))?;

    Ok(Json(session.into()))
}

/// Update a session's title and/or lifecycle state.
#[utoipa::path(
    put,
    path = "/api/v1/sessions/{session_id}",
    tag = "sessions",
    params(("session_id" = Uuid, Path, description = "Session ID")),
    request_body = SessionUpdate,
    responses(
        (status = 200, description = "Updated session", body = SessionResponse),
        (status = 400, description = "Invalid title"),
        (status = 404, description = "Session not found"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn update_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<SessionUpdate>,
) -> Result<Json<SessionResponse>, ApiError> {
    let mut session = app_state
        .store
        .get_session(session_id, false)
        .await?
        .ok_or_else(|| session_not_found(session_id))?;

    if let Some(title) = payload.title {
        validate_title(&title)?;
        session.title = title;
    }
    if let Some(is_active) = payload.is_active {
        session.status = rag_agent_core::domain::SessionStatus::from_active_flag(is_active);
    }
    session.updated_at = Utc::now();

    let updated = app_state
        .store
        .update_session(&session)
        .await?
        .ok_or_else(|| session_not_found(session_id))?;

    Ok(Json(SessionResponse::from_session(&updated, None)))
}

/// Delete (deactivate) a session. Its messages are kept.
#[utoipa::path(
    delete,
    path = "/api/v1/sessions/{session_id}",
    tag = "sessions",
    params(("session_id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 204, description = "Session deactivated"),
        (status = 404, description = "Session not found"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn delete_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !app_state.store.deactivate_session(session_id).await? {
        return Err(session_not_found(session_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Service Endpoints
//=========================================================================================

/// Root endpoint reporting the service identity.
pub async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({
        "name": APP_NAME,
        "version": APP_VERSION,
        "status": "running",
    }))
}

/// Health check endpoint.
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}
