//! HTTP API v1: operations, conversation management, usage.
//!
//! Endpoints:
//!
//! - `GET    /v1/operations`                  Registered operation names
//! - `POST   /v1/operations/{name}`           Run an operation
//! - `POST   /v1/chat`                        Shorthand for the `chat` operation
//! - `GET    /v1/conversations`               List the caller's conversations
//! - `GET    /v1/conversations/{id}`          One conversation with its messages
//! - `POST   /v1/conversations/{id}/archive`  Archive a conversation
//! - `DELETE /v1/conversations/{id}`          Delete a conversation and its messages
//! - `GET    /v1/usage`                       Caller's usage in the current window
//!
//! Every route requires the `X-User-Id` header set by the fronting identity
//! provider.

use axum::{
    Router,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use parley_core::message::{Conversation, ConversationId, ConversationStatus, Message, UserId};
use parley_core::operation::{ModelParameters, OperationInput, OperationRequest, OperationResult};
use parley_core::store::ConversationQuery;
use parley_orchestrator::UsageSnapshot;

use crate::SharedState;
use crate::error::ApiError;

/// Header carrying the authenticated user identifier.
pub const USER_HEADER: &str = "x-user-id";

/// Largest page `GET /v1/conversations` will return.
const MAX_PAGE: usize = 100;

/// Build the v1 router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/operations", get(list_operations_handler))
        .route("/operations/{name}", post(operation_handler))
        .route("/chat", post(chat_handler))
        .route("/conversations", get(list_conversations_handler))
        .route(
            "/conversations/{id}",
            get(get_conversation_handler).delete(delete_conversation_handler),
        )
        .route("/conversations/{id}/archive", post(archive_conversation_handler))
        .route("/usage", get(usage_handler))
        .with_state(state)
}

// ── Identity ──────────────────────────────────────────────────────────────

/// The caller, as asserted by the identity provider.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CurrentUser(UserId::from(v)))
            .ok_or(ApiError::Unauthenticated)
    }
}

// ── Operations ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct OperationBody {
    #[serde(default, alias = "text")]
    pub message: String,

    #[serde(default)]
    pub image_url: Option<String>,

    #[serde(default)]
    pub conversation_id: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    /// Strategy-specific attributes (`code`, `language`, `device_type`, ...)
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl OperationBody {
    fn into_request(self, user_id: UserId, operation: String) -> OperationRequest {
        let input = OperationInput {
            text: self.message,
            image_url: self.image_url.filter(|u| !u.trim().is_empty()),
            attributes: self.attributes,
        };
        let mut request = OperationRequest::new(user_id, operation, input).with_overrides(ModelParameters {
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        });
        if let Some(id) = self.conversation_id.filter(|id| !id.is_empty()) {
            request = request.in_conversation(ConversationId(id));
        }
        if let Some(title) = self.title {
            request = request.with_title(title);
        }
        request
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OperationListResponse {
    pub operations: Vec<String>,
}

async fn list_operations_handler(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
) -> Json<OperationListResponse> {
    Json(OperationListResponse {
        operations: state.orchestrator.operations(),
    })
}

async fn operation_handler(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(name): Path<String>,
    payload: Result<Json<OperationBody>, JsonRejection>,
) -> Result<Json<OperationResult>, ApiError> {
    let Json(body) = payload.map_err(ApiError::from)?;
    run_operation(&state, user, name, body).await
}

async fn chat_handler(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<OperationBody>, JsonRejection>,
) -> Result<Json<OperationResult>, ApiError> {
    let Json(body) = payload.map_err(ApiError::from)?;
    run_operation(&state, user, "chat".into(), body).await
}

async fn run_operation(
    state: &SharedState,
    user: UserId,
    operation: String,
    body: OperationBody,
) -> Result<Json<OperationResult>, ApiError> {
    info!(user = %user, operation = %operation, "Operation request received");
    let request = body.into_request(user, operation);
    let result = state.orchestrator.execute(request).await?;
    Ok(Json(result))
}

// ── Conversations ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub offset: Option<usize>,

    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<Conversation>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

async fn list_conversations_handler(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ConversationListResponse>, ApiError> {
    let Query(params) = params.map_err(ApiError::from)?;

    let mut query = ConversationQuery::for_user(user);
    let offset = params.offset.unwrap_or(query.offset);
    let limit = params.limit.unwrap_or(query.limit).clamp(1, MAX_PAGE);
    query = query.page(offset, limit);
    if let Some(status) = params.status.as_deref() {
        let status = ConversationStatus::parse(status)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {status}")))?;
        query = query.with_status(status);
    }

    let conversations = state.orchestrator.list_conversations(query).await?;
    Ok(Json(ConversationListResponse {
        count: conversations.len(),
        conversations,
    }))
}

async fn get_conversation_handler(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetail>, ApiError> {
    let (conversation, messages) = state
        .orchestrator
        .get_conversation(&user, &ConversationId(id))
        .await?;
    Ok(Json(ConversationDetail { conversation, messages }))
}

async fn archive_conversation_handler(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = state
        .orchestrator
        .archive_conversation(&user, &ConversationId(id))
        .await?;
    Ok(Json(conversation))
}

async fn delete_conversation_handler(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .delete_conversation(&user, &ConversationId(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Usage ─────────────────────────────────────────────────────────────────

async fn usage_handler(State(state): State<SharedState>, CurrentUser(user): CurrentUser) -> Json<UsageSnapshot> {
    Json(state.orchestrator.usage(&user))
}
