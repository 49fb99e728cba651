//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{EmbeddingRetriever, OpenAiGenerator, SqlxConversationStore},
    config::Config,
    error::ApiError,
    web::{
        chat_handler, chat_stream_handler, create_session_handler, delete_session_handler,
        get_session_handler, health_handler, ingest_documents_handler, list_sessions_handler,
        rest::ApiDoc, root_handler, update_session_handler, AppState,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, post},
    Router,
};
use rag_agent_core::orchestrator::QueryOrchestrator;
use rag_agent_core::ports::{ConversationStore, Generator, Retriever};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(SqlxConversationStore::new(db_pool));
    info!("Running database migrations...");
    store
        .run_migrations()
        .await
        .map_err(|e| ApiError::Internal(format!("migration failed: {e}")))?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    // A missing key degrades the chat capability rather than failing
    // startup; the error then surfaces on first use.
    let openai_config = match &config.openai_api_key {
        Some(key) => OpenAIConfig::new().with_api_key(key),
        None => {
            warn!("OPENAI_API_KEY is not set; chat and retrieval will fail until it is provided");
            OpenAIConfig::new()
        }
    };
    let openai_client = Client::with_config(openai_config);

    let retriever = Arc::new(EmbeddingRetriever::new(
        openai_client.clone(),
        config.embedding_model.clone(),
        config.retrieval_top_k,
    ));
    let generator = Arc::new(OpenAiGenerator::new(
        openai_client.clone(),
        config.chat_model.clone(),
    ));

    // Initial ingestion is best-effort: a failure leaves the index empty
    // and retrieval degraded, not the process dead.
    match retriever.ingest_directory(&config.knowledge_base_path).await {
        Ok(count) if count > 0 => info!(chunks = count, "initial document ingestion completed"),
        Ok(_) => info!("no documents ingested at startup"),
        Err(e) => warn!(error = %e, "initial document ingestion failed"),
    }

    let orchestrator = Arc::new(QueryOrchestrator::new(
        Arc::clone(&store) as Arc<dyn ConversationStore>,
        Arc::clone(&retriever) as Arc<dyn Retriever>,
        generator as Arc<dyn Generator>,
    ));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        store,
        retriever,
        orchestrator,
    });

    // --- 5. Configure CORS ---
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    let api_router = Router::new()
        .route(
            "/api/v1/sessions",
            post(create_session_handler).get(list_sessions_handler),
        )
        .route(
            "/api/v1/sessions/{session_id}",
            get(get_session_handler)
                .put(update_session_handler)
                .delete(delete_session_handler),
        )
        .route("/api/v1/chat", post(chat_handler))
        .route("/api/v1/chat/stream", post(chat_stream_handler))
        .route("/api/v1/chat/ingest", post(ingest_documents_handler))
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for the complete app.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
