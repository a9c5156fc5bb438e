use application::{
    CreateConversation, HistoryPage, HistoryQuery, ReadOrigin, SubmitMessage, UpdateGroup,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use domain::{
    Conversation, ConversationId, MediaDescriptor, MessageId, MessageType, MessageView,
    TypingTarget, UserId,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthUser, error::ApiError, state::AppState, websocket::websocket_upgrade};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationPayload {
    participants: Vec<UserId>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    is_group: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateConversationPayload {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    participants: Option<Vec<UserId>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    conversation_id: ConversationId,
    #[serde(default)]
    content: String,
    #[serde(rename = "type", default)]
    message_type: MessageType,
    #[serde(default)]
    media: Option<MediaDescriptor>,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<u32>,
    before: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    #[serde(flatten)]
    target: TypingTarget,
    is_typing: bool,
}

#[derive(Debug, Serialize)]
struct BulkReadResponse {
    updated: u64,
}

#[derive(Debug, Serialize)]
struct SingleReadResponse {
    updated: bool,
}

#[derive(Debug, Serialize)]
struct TypingResponse {
    delivered: usize,
}

#[derive(Debug, Serialize)]
struct OnlineUsersResponse {
    users: Vec<UserId>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/conversations", post(create_conversation))
        .route(
            "/conversations/{conversation_id}",
            get(get_conversation).patch(update_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(get_history),
        )
        .route(
            "/conversations/{conversation_id}/read",
            post(mark_conversation_read),
        )
        .route("/messages", post(send_message))
        .route("/messages/{message_id}/read", patch(mark_message_read))
        .route("/typing", post(relay_typing))
        .route("/users/online", get(online_users))
        .route("/ws", get(websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<CreateConversationPayload>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let conversation = state
        .realtime
        .conversations()
        .create(CreateConversation {
            creator: caller.id,
            participants: payload.participants,
            title: payload.title,
            is_group: payload.is_group,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn get_conversation(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = state
        .realtime
        .conversations()
        .get(conversation_id, caller.id)
        .await?;
    Ok(Json(conversation))
}

async fn update_conversation(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(conversation_id): Path<ConversationId>,
    Json(payload): Json<UpdateConversationPayload>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = state
        .realtime
        .conversations()
        .update(
            conversation_id,
            caller.id,
            UpdateGroup {
                title: payload.title,
                participants: payload.participants,
            },
        )
        .await?;
    Ok(Json(conversation))
}

async fn get_history(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(conversation_id): Path<ConversationId>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage>, ApiError> {
    let page = state
        .realtime
        .conversations()
        .history(
            conversation_id,
            caller.id,
            HistoryQuery {
                limit: params.limit,
                before: params.before,
            },
        )
        .await?;
    Ok(Json(page))
}

async fn mark_conversation_read(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<BulkReadResponse>, ApiError> {
    let outcome = state
        .realtime
        .read_receipts()
        .mark_read(ReadOrigin::Rest, conversation_id, caller.id)
        .await?;
    Ok(Json(BulkReadResponse {
        updated: outcome.updated,
    }))
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let outcome = state
        .realtime
        .fanout()
        .submit(
            None,
            SubmitMessage {
                sender: caller,
                conversation_id: payload.conversation_id,
                content: payload.content,
                message_type: payload.message_type,
                media: payload.media,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(outcome.message)))
}

async fn mark_message_read(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(message_id): Path<MessageId>,
) -> Result<Json<SingleReadResponse>, ApiError> {
    let updated = state
        .realtime
        .read_receipts()
        .mark_message_read(message_id, caller.id)
        .await?;
    Ok(Json(SingleReadResponse { updated }))
}

async fn relay_typing(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<TypingPayload>,
) -> Result<Json<TypingResponse>, ApiError> {
    let scope = payload
        .target
        .scope()
        .map_err(application::ApplicationError::from)?;
    let report = state
        .realtime
        .typing()
        .relay(caller.id, None, scope, payload.is_typing)
        .await;
    Ok(Json(TypingResponse {
        delivered: report.delivered,
    }))
}

async fn online_users(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
) -> Json<OnlineUsersResponse> {
    Json(OnlineUsersResponse {
        users: state.realtime.presence().snapshot_online_users().await,
    })
}
