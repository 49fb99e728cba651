//! services/api/src/web/chat.rs
//!
//! Contains the Axum handlers for the chat endpoints: batch, streaming
//! (server-sent events) and the manual ingestion trigger.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
};
use futures::{Stream, StreamExt};
use rag_agent_core::events::{EventEncoder, TurnEvent, WireEvent};
use tracing::{error, info};

use crate::error::ApiError;
use crate::web::dto::{ChatRequest, ChatResponse, IngestResponse, MessageResponse, ReferenceDocumentDto};
use crate::web::state::AppState;

//=========================================================================================
// Chat Handlers
//=========================================================================================

/// Send a chat message and get the complete response.
#[utoipa::path(
    post,
    path = "/api/v1/chat",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "The assistant's answer", body = ChatResponse),
        (status = 400, description = "Empty message"),
        (status = 500, description = "Retrieval, generation or persistence failure")
    )
)]
pub async fn chat_handler(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    info!("processing chat request");
    let outcome = app_state
        .orchestrator
        .run_turn(request.session_id, &request.message)
        .await?;

    // The immediate response carries the full documents, not the stored
    // previews.
    let mut message = MessageResponse::from(&outcome.message);
    message.references = Some(
        outcome
            .references
            .iter()
            .map(ReferenceDocumentDto::from)
            .collect(),
    );

    Ok(Json(ChatResponse {
        session_id: outcome.session_id,
        message,
    }))
}

/// Send a chat message and stream the response as server-sent events.
///
/// Each event's data is one JSON object discriminated by `event_type`; the
/// stream always closes with exactly one terminal `done` or `error` event.
#[utoipa::path(
    post,
    path = "/api/v1/chat/stream",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Server-sent event stream of the answer",
         content_type = "text/event-stream")
    )
)]
pub async fn chat_stream_handler(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("processing streaming chat request");
    let orchestrator = Arc::clone(&app_state.orchestrator);

    let stream = async_stream::stream! {
        let mut encoder = EventEncoder::new();
        match orchestrator.stream_turn(request.session_id, &request.message).await {
            Ok(events) => {
                futures::pin_mut!(events);
                while let Some(event) = events.next().await {
                    if let Some(wire) = encoder.encode(event) {
                        yield Ok(sse_event(&wire));
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "chat stream failed before the first event");
                if let Some(wire) = encoder.encode(TurnEvent::Error(e.to_string())) {
                    yield Ok(sse_event(&wire));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn sse_event(wire: &WireEvent) -> Event {
    match serde_json::to_string(wire) {
        Ok(json) => Event::default().data(json),
        Err(e) => Event::default().data(
            serde_json::json!({ "event_type": "error", "error": e.to_string() }).to_string(),
        ),
    }
}

//=========================================================================================
// Ingestion Trigger
//=========================================================================================

/// Manually trigger document ingestion from the knowledge base.
#[utoipa::path(
    post,
    path = "/api/v1/chat/ingest",
    tag = "chat",
    responses(
        (status = 202, description = "Ingestion completed", body = IngestResponse),
        (status = 500, description = "Ingestion failed")
    )
)]
pub async fn ingest_documents_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let count = app_state
        .retriever
        .ingest_directory(&app_state.config.knowledge_base_path)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            message: "Ingestion completed".to_string(),
            documents_ingested: count,
        }),
    ))
}
