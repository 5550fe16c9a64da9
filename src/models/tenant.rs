use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Outermost isolation unit. Every persisted record, cache key, bus subject
/// and blob prefix is keyed on a tenant id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Tenant {
    pub id: Uuid,
    /// Stable organization identifier issued by the identity provider.
    pub external_org_id: String,
    pub name: String,
    pub plan: String,
    pub storage_quota_gb: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTenantRequest {
    pub external_org_id: String,
    pub name: String,
    pub plan: Option<String>,
    pub storage_quota_gb: Option<i64>,
}
