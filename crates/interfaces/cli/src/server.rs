//! The HTTP surface described in the external-interfaces contract. Thin by
//! design: every handler does validation/serialization only and delegates
//! the actual work to the `runtime` crate.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use domain::{ChatMessage, DomainError, MessageRole, session_id};
use runtime::types::{ChatRequest, HistoryDeleteQuery, HistoryDeleteScope, TransferBundle};
use runtime::{AppState, delete_history, handle_chat_turn};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat", post(post_chat))
        .route("/chat/history", delete(delete_chat_history))
        .route("/chat/messages", get(get_messages))
        .route("/chat/archived", get(get_archived))
        .route("/chat/unarchive", post(post_unarchive))
        .route("/chat/import", post(post_import))
        .route("/chat/export", get(get_export))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Wraps `DomainError` with the HTTP mapping from the error-handling policy:
/// validation failures are 400, everything else (upstream failure, storage
/// unavailability, internal errors) is 500.
struct ApiError(DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DomainError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn post_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<runtime::types::ChatResponse>, ApiError> {
    let response = handle_chat_turn(&state, request).await?;
    Ok(Json(response))
}

async fn delete_chat_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryDeleteQuery>,
) -> Result<StatusCode, ApiError> {
    let scope_is_card = matches!(query.scope, HistoryDeleteScope::Card);
    delete_history(&state, &query.user_id, &query.character_id, scope_is_card).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    user_id: String,
    character_id: String,
}

#[derive(Debug, Serialize)]
struct MessageOut {
    id: Uuid,
    role: &'static str,
    content: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

fn to_message_out(message: &ChatMessage) -> MessageOut {
    MessageOut {
        id: message.id,
        role: match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        },
        content: message.content.clone(),
        created_at: message.created_at,
    }
}

async fn get_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Vec<MessageOut>>, ApiError> {
    let sid = session_id(&query.user_id, &query.character_id);
    let messages = state.history.recent_non_archived(&sid, i64::MAX).await?;
    Ok(Json(messages.iter().map(to_message_out).collect()))
}

async fn get_archived(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Vec<MessageOut>>, ApiError> {
    let sid = session_id(&query.user_id, &query.character_id);
    let messages = state.history.list_archived(&sid).await?;
    Ok(Json(messages.iter().map(to_message_out).collect()))
}

#[derive(Debug, Deserialize)]
struct UnarchiveRequest {
    ids: Vec<Uuid>,
}

async fn post_unarchive(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UnarchiveRequest>,
) -> Result<StatusCode, ApiError> {
    state.history.unarchive(&request.ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    user_id: String,
    character_id: String,
    bundle: TransferBundle,
}

async fn post_import(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sid = session_id(&request.user_id, &request.character_id);
    let imported = runtime::transfer::import_session(&state.history, &sid, &request.bundle).await?;
    Ok(Json(serde_json::json!({ "imported": imported })))
}

async fn get_export(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<TransferBundle>, ApiError> {
    let sid = session_id(&query.user_id, &query.character_id);
    let bundle = runtime::transfer::export_session(&state.history, &sid, &query.character_id, None).await?;
    Ok(Json(bundle))
}
