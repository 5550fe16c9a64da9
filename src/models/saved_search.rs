use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// A persisted KQL query. Pure convenience record, no behavioral invariants.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct SavedSearch {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: String,
    pub name: String,
    pub query: String,
    pub filters: serde_json::Value,
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSavedSearchRequest {
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub filters: serde_json::Value,
    #[serde(default)]
    pub pinned: bool,
}
