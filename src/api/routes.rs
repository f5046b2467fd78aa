use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    api::dto::*,
    auth::AuthUser,
    config::Config,
    models::internal::{Conversation, Message, NewConversation},
    relay::{ChatRelay, RelayError},
    storage::repository::{ConversationRepository, RepositoryError},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<Config>>,
    pub repo: Arc<dyn ConversationRepository>,
    pub relay: Arc<ChatRelay>,
}

#[derive(Deserialize)]
pub struct PaginationParams {
    page: Option<u32>,
    page_size: Option<u32>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: String) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message,
            code: status.as_u16() as u32,
        }),
    )
}

fn repo_error(e: RepositoryError) -> ApiError {
    let status = match &e {
        RepositoryError::NotFound(_) => StatusCode::NOT_FOUND,
        RepositoryError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RepositoryError::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

fn relay_error(e: RelayError) -> ApiError {
    match e {
        RelayError::Repository(inner) => repo_error(inner),
        RelayError::Completion(inner) => {
            error_response(StatusCode::BAD_GATEWAY, inner.to_string())
        }
        RelayError::EmptyMessage => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
        RelayError::ConversationNotFound(_) => {
            error_response(StatusCode::NOT_FOUND, e.to_string())
        }
    }
}

fn conversation_response(conv: Conversation, message_count: u64) -> ConversationResponse {
    ConversationResponse {
        id: conv.id,
        title: conv.title,
        message_count,
        created_at: conv.created_at.to_string(),
        updated_at: conv.updated_at.to_string(),
    }
}

fn message_response(msg: Message) -> MessageResponse {
    let image_url = msg
        .attachment
        .as_ref()
        .and_then(|a| a.get("image_url"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    MessageResponse {
        id: msg.id,
        conversation_id: msg.conversation_id,
        role: msg.role,
        content: msg.content,
        image_url,
        created_at: msg.created_at.to_string(),
    }
}

pub async fn create_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ConversationResponse>), ApiError> {
    let title = req
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let id = Uuid::new_v4();
    let new_conv = NewConversation {
        id: Some(id),
        user_id: user.id.clone(),
        title,
        messages: vec![],
    };

    state.repo.create(new_conv).await.map_err(repo_error)?;

    let conv = state
        .repo
        .find_by_id(&user.id, id)
        .await
        .map_err(repo_error)?
        .ok_or_else(|| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Conversation vanished after insert".to_string(),
            )
        })?;

    Ok((StatusCode::CREATED, Json(conversation_response(conv, 0))))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let conv = state
        .repo
        .find_by_id(&user.id, id)
        .await
        .map_err(repo_error)?
        .ok_or_else(|| {
            error_response(StatusCode::NOT_FOUND, "Conversation not found".to_string())
        })?;

    let count = state
        .repo
        .count_messages(&user.id, id)
        .await
        .map_err(repo_error)?;

    Ok(Json(conversation_response(conv, count)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Json<ConversationListResponse>, ApiError> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(50).clamp(1, 200);
    let limit = page_size as u64;
    let offset = ((page - 1) * page_size) as u64;

    let (conversations, total) = state
        .repo
        .list_for_user(&user.id, limit, offset)
        .await
        .map_err(repo_error)?;

    let mut responses = Vec::with_capacity(conversations.len());
    for conv in conversations {
        let count = state
            .repo
            .count_messages(&user.id, conv.id)
            .await
            .map_err(repo_error)?;
        responses.push(conversation_response(conv, count));
    }

    Ok(Json(ConversationListResponse {
        conversations: responses,
        total,
        page,
        page_size,
    }))
}

pub async fn rename_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameConversationRequest>,
) -> Result<StatusCode, ApiError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Title must not be empty".to_string(),
        ));
    }

    state
        .repo
        .rename(&user.id, id, title)
        .await
        .map_err(repo_error)?;

    Ok(StatusCode::OK)
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .repo
        .delete(&user.id, id)
        .await
        .map_err(repo_error)?;

    Ok(StatusCode::OK)
}

pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageListResponse>, ApiError> {
    state
        .repo
        .find_by_id(&user.id, id)
        .await
        .map_err(repo_error)?
        .ok_or_else(|| {
            error_response(StatusCode::NOT_FOUND, "Conversation not found".to_string())
        })?;

    let messages = state
        .repo
        .get_conversation_messages(&user.id, id)
        .await
        .map_err(repo_error)?;

    Ok(Json(MessageListResponse {
        messages: messages.into_iter().map(message_response).collect(),
    }))
}

pub async fn chat(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let reply = state
        .relay
        .send_message(&user.id, id, &req.content, req.image_url)
        .await
        .map_err(relay_error)?;

    Ok(Json(ChatResponse {
        conversation_id: reply.conversation_id,
        user_message_id: reply.user_message_id,
        assistant_message_id: reply.assistant_message_id,
        content: reply.content,
    }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/conversations", post(create_conversation))
        .route("/api/v1/conversations", get(list_conversations))
        .route("/api/v1/conversations/{id}", get(get_conversation))
        .route("/api/v1/conversations/{id}/title", put(rename_conversation))
        .route("/api/v1/conversations/{id}", delete(delete_conversation))
        .route("/api/v1/conversations/{id}/messages", get(list_messages))
        .route("/api/v1/conversations/{id}/chat", post(chat))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn metrics(State(state): State<AppState>) -> String {
    let count = state.repo.count_conversations().await.unwrap_or(0);

    format!(
        "# HELP ike_conversations_total Total number of conversations\n\
         # TYPE ike_conversations_total gauge\n\
         ike_conversations_total {}\n\
         # HELP ike_up Whether the service is up\n\
         # TYPE ike_up gauge\n\
         ike_up 1\n",
        count
    )
}
