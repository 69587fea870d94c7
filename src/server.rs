//! HTTP server for the chat front-end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Answer `{ "question": "..." }` with `{ answer, sources }` |
//! | `OPTIONS` | `/api/chat` | Preflight, always `200` with an empty body |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Any other method on `/api/chat` gets `405`. When `[server].static_dir`
//! is set, every other path is served from that directory.
//!
//! # Error Contract
//!
//! Error bodies carry one fixed, user-facing message from `[messages]`:
//!
//! ```json
//! { "error": "Domanda mancante" }
//! ```
//!
//! | Status | Cause |
//! |--------|-------|
//! | 400 | missing, blank, or unparsable question |
//! | 405 | method other than `POST`/`OPTIONS` |
//! | 500 | retrieval or generation failure |
//! | 504 | pipeline exceeded `request_timeout_secs` |
//!
//! Diagnostic detail is logged and never sent to the client.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use corpus_chat_core::chat::{ChatPipeline, ChatResponse};
use corpus_chat_core::error::{ChatError, RetrievalError};
use corpus_chat_core::retrieve::Retriever;

use crate::config::{Config, MessagesConfig, ServerConfig};
use crate::service::build_pipeline;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<ChatPipeline>,
    messages: Arc<MessagesConfig>,
    timeout: Duration,
}

/// Starts the chat server.
///
/// Builds the pipeline from `config`, binds to `[server].bind`, and runs
/// until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(build_pipeline(config).await?);
    let app = build_router(pipeline.clone(), &config.server, &config.messages);

    println!(
        "Chat server listening on http://{} (policy: {})",
        config.server.bind,
        pipeline.retriever().policy()
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router around an already-constructed pipeline.
pub fn build_router(
    pipeline: Arc<ChatPipeline>,
    server: &ServerConfig,
    messages: &MessagesConfig,
) -> Router {
    let state = AppState {
        pipeline,
        messages: Arc::new(messages.clone()),
        timeout: Duration::from_secs(server.request_timeout_secs),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let chat = post(handle_chat)
        .options(handle_preflight)
        .fallback(handle_method_not_allowed);

    let mut app = Router::new()
        .route("/api/chat", chat)
        .route("/health", get(handle_health));

    if let Some(dir) = &server.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl AppState {
    /// Map a pipeline failure to its status and fixed message, logging the detail.
    fn chat_error(&self, err: ChatError) -> AppError {
        let (status, message) = match &err {
            ChatError::Validation(_) => (StatusCode::BAD_REQUEST, &self.messages.missing_question),
            ChatError::Retrieval(RetrievalError::Disabled(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, &self.messages.server_error)
            }
            ChatError::Retrieval(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, &self.messages.search_error)
            }
            ChatError::Generation(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, &self.messages.generation_error)
            }
            ChatError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, &self.messages.timeout),
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %err, "chat request failed");
        } else {
            debug!(error = %err, "chat request rejected");
        }

        AppError {
            status,
            message: message.clone(),
        }
    }
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    question: Option<String>,
}

/// Handler for `POST /api/chat`.
///
/// The whole pipeline runs under `[server].request_timeout_secs`.
async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let question = match payload {
        Ok(Json(ChatRequest {
            question: Some(q),
        })) if !q.trim().is_empty() => q,
        Ok(_) => {
            return Err(state.chat_error(ChatError::Validation(
                "question is missing or blank".to_string(),
            )))
        }
        Err(rejection) => {
            return Err(state.chat_error(ChatError::Validation(rejection.body_text())));
        }
    };

    match tokio::time::timeout(state.timeout, state.pipeline.answer(&question)).await {
        Ok(Ok(response)) => Ok(Json(response)),
        Ok(Err(err)) => Err(state.chat_error(err)),
        Err(_) => {
            warn!(timeout_secs = state.timeout.as_secs(), "chat request timed out");
            Err(state.chat_error(ChatError::Timeout(state.timeout.as_secs())))
        }
    }
}

async fn handle_preflight() -> StatusCode {
    StatusCode::OK
}

async fn handle_method_not_allowed(State(state): State<AppState>) -> AppError {
    AppError {
        status: StatusCode::METHOD_NOT_ALLOWED,
        message: state.messages.method_not_allowed.clone(),
    }
}
