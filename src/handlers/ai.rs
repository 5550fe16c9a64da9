//! Conversation management and the streaming chat endpoint.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::ai::{ChatEvent, ChatRequest};
use crate::middleware::TenantContext;
use crate::models::CreateConversationRequest;
use crate::utils::ApiError;
use crate::AppState;

/// Buffered chat events between the turn task and the SSE writer. Sized so a
/// fast provider never stalls on a momentarily slow client.
const CHAT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListConversationParams {
    pub job_id: Option<Uuid>,
}

#[utoipa::path(
    get,
    path = "/api/v1/ai/conversations",
    params(ListConversationParams),
    responses((status = 200, description = "Conversations for the caller")),
    tag = "AI"
)]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Query(params): Query<ListConversationParams>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .conversations
            .list(ctx.tenant_id, &ctx.user_id, params.job_id)
            .await?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/ai/conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created"),
        (status = 404, description = "Unknown job"),
    ),
    tag = "AI"
)]
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .conversations
        .create(ctx.tenant_id, &ctx.user_id, req.job_id, req.title)
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct MessagesParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
}

fn default_page() -> i64 {
    1
}
fn default_size() -> i64 {
    100
}

#[utoipa::path(
    get,
    path = "/api/v1/ai/conversations/{id}",
    params(("id" = Uuid, Path, description = "Conversation id"), MessagesParams),
    responses(
        (status = 200, description = "Conversation with paginated messages"),
        (status = 404, description = "Unknown conversation"),
    ),
    tag = "AI"
)]
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Query(params): Query<MessagesParams>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state.conversations.get(ctx.tenant_id, id).await?;
    let size = params.size.clamp(1, 500);
    let offset = (params.page.max(1) - 1) * size;
    let messages = state
        .conversations
        .messages(ctx.tenant_id, id, size, offset)
        .await?;
    Ok(Json(json!({ "conversation": conversation, "messages": messages })))
}

#[utoipa::path(
    delete,
    path = "/api/v1/ai/conversations/{id}",
    params(("id" = Uuid, Path, description = "Conversation id")),
    responses(
        (status = 204, description = "Deleted, messages cascade"),
        (status = 404, description = "Unknown conversation"),
    ),
    tag = "AI"
)]
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.conversations.delete(ctx.tenant_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// One chat turn over SSE: `skill`, then `token`s, then `metadata` and
/// `done` (or a terminal `error`). Rate limiting and job ownership reject
/// before the stream opens.
#[utoipa::path(
    post,
    path = "/api/v1/ai/stream",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "SSE stream", content_type = "text/event-stream"),
        (status = 404, description = "Unknown job"),
        (status = 429, description = "Per-user AI quota exhausted"),
    ),
    tag = "AI"
)]
pub async fn ai_stream(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .chat
        .authorize(ctx.tenant_id, &ctx.user_id, &req)
        .await?;

    let (tx, rx) = mpsc::channel::<ChatEvent>(CHAT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    let chat = Arc::clone(&state.chat);
    let tenant_id = ctx.tenant_id;
    let user_id = ctx.user_id.clone();
    let turn_cancel = cancel.clone();
    tokio::spawn(async move {
        chat.stream_turn(tenant_id, &user_id, req, tx, turn_cancel)
            .await;
    });

    Ok(sse_response(chat_event_stream(rx, cancel)))
}

/// Bridge the turn channel onto SSE. Dropping the stream (client disconnect)
/// cancels the turn via the guard, which aborts the provider stream.
fn chat_event_stream(
    mut rx: mpsc::Receiver<ChatEvent>,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let _guard = cancel.drop_guard();
        while let Some(event) = rx.recv().await {
            let terminal = matches!(event, ChatEvent::Done | ChatEvent::Error { .. });
            yield Ok(to_sse_event(event));
            if terminal {
                break;
            }
        }
    }
}

fn to_sse_event(event: ChatEvent) -> Event {
    let (name, data) = match event {
        ChatEvent::Skill { skill } => ("skill", json!({ "skill": skill.as_str() })),
        ChatEvent::Token { text } => ("token", json!({ "text": text })),
        ChatEvent::Metadata { tokens_used, latency_ms, follow_ups } => (
            "metadata",
            json!({
                "tokens_used": tokens_used,
                "latency_ms": latency_ms,
                "follow_ups": follow_ups,
            }),
        ),
        ChatEvent::Done => ("done", json!({})),
        ChatEvent::Error { message } => ("error", json!({ "message": message })),
    };
    Event::default().event(name).data(data.to_string())
}

/// SSE with the anti-buffering headers: without them a reverse proxy will
/// batch tokens and the first-token latency goal is lost.
pub(crate) fn sse_response<S>(stream: S) -> impl IntoResponse
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
}
