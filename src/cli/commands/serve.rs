//! HTTP API server for integration with other systems.
//!
//! Exposes sessions over REST. Each session is serialised behind its own
//! mutex by the [`SessionManager`].

use super::engine;
use crate::cli::Output;
use crate::config::Settings;
use crate::error::ItineraError;
use crate::session::SessionManager;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Run the HTTP API server.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    let (orchestrator, store) = engine(&settings, None)?;
    let state = Arc::new(SessionManager::new(orchestrator, store));

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Itinera API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Tools", "GET  /tools");
    Output::kv("Sessions", "GET  /sessions, POST /sessions");
    Output::kv("Session", "GET  /sessions/{id}");
    Output::kv("History", "GET  /sessions/{id}/history");
    Output::kv("Message", "POST /sessions/{id}/messages");
    Output::kv("Confirm", "POST /sessions/{id}/confirm");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn router(state: Arc<SessionManager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/history", get(get_history))
        .route("/sessions/{id}/messages", post(send_message))
        .route("/sessions/{id}/confirm", post(confirm_tool))
        .layer(cors)
        .with_state(state)
}

// === Request/Response Types ===

#[derive(Deserialize, Default)]
struct CreateSessionRequest {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct CreateSessionResponse {
    session_id: String,
}

#[derive(Deserialize)]
struct MessageRequest {
    text: String,
}

#[derive(Deserialize)]
struct ConfirmRequest {
    tool: String,
}

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    idempotent: bool,
    external_side_effect: bool,
    requires_confirmation: bool,
    input_schema: serde_json::Value,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

/// Error wrapper mapping library errors to status codes.
struct ApiError(ItineraError);

impl From<ItineraError> for ApiError {
    fn from(e: ItineraError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ItineraError::NotFound(_) => StatusCode::NOT_FOUND,
            ItineraError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ItineraError::Session(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                kind: self.0.kind(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_tools(State(state): State<Arc<SessionManager>>) -> impl IntoResponse {
    let tools: Vec<ToolInfo> = state
        .orchestrator()
        .runtime()
        .registry
        .specs()
        .map(|spec| ToolInfo {
            name: spec.name.clone(),
            description: spec.description.clone(),
            idempotent: spec.idempotent,
            external_side_effect: spec.external_side_effect,
            requires_confirmation: spec.requires_confirmation,
            input_schema: spec.input_schema.clone(),
        })
        .collect();
    Json(tools)
}

async fn list_sessions(State(state): State<Arc<SessionManager>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.list().await?))
}

async fn create_session(
    State(state): State<Arc<SessionManager>>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult<impl IntoResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let session_id = state.create(req.session_id.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

async fn get_session(
    State(state): State<Arc<SessionManager>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.current(&id).await?))
}

async fn delete_session(
    State(state): State<Arc<SessionManager>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if state.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ItineraError::NotFound(format!("session {}", id)).into())
    }
}

async fn get_history(
    State(state): State<Arc<SessionManager>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.history(&id).await?))
}

async fn send_message(
    State(state): State<Arc<SessionManager>>,
    Path(id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.send(&id, &req.text).await?))
}

async fn confirm_tool(
    State(state): State<Arc<SessionManager>>,
    Path(id): Path<String>,
    Json(req): Json<ConfirmRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.confirm(&id, &req.tool).await?))
}
