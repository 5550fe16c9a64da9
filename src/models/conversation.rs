use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// A chat thread scoped to `(tenant, user, job)`.
///
/// `message_count` and `last_message_at` are denormalized counters maintained
/// by metadata-store triggers; application code never adjusts them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: String,
    pub job_id: Uuid,
    pub title: Option<String>,
    pub message_count: i32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "message_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "message_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Streaming,
    Complete,
    Error,
}

/// One message in a conversation. `tenant_id` is denormalized so the
/// row-level policy is a direct equality check without joining back to
/// `conversations`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub tenant_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub skill_name: Option<String>,
    #[sqlx(json(nullable))]
    pub follow_ups: Option<Vec<String>>,
    pub tokens_used: Option<i32>,
    pub latency_ms: Option<i64>,
    pub status: MessageStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a message; ids and timestamps are store-assigned.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub skill_name: Option<String>,
    pub follow_ups: Option<Vec<String>>,
    pub tokens_used: Option<i32>,
    pub latency_ms: Option<i64>,
    pub status: MessageStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateConversationRequest {
    pub job_id: Uuid,
    pub title: Option<String>,
}
