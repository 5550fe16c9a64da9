//! Dashboard section endpoints. All of them answer 409 `not_ready` until the
//! job is `complete`.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::middleware::TenantContext;
use crate::utils::ApiError;
use crate::AppState;

#[utoipa::path(
    get,
    path = "/api/v1/analysis/{job_id}/dashboard",
    params(("job_id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Dashboard aggregate"),
        (status = 409, description = "Job not complete"),
    ),
    tag = "Dashboard"
)]
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dashboards.dashboard(ctx.tenant_id, job_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/analysis/{job_id}/dashboard/aggregates",
    params(("job_id" = Uuid, Path, description = "Job id")),
    responses((status = 200, description = "Group-by aggregate tables"), (status = 409, description = "Not ready")),
    tag = "Dashboard"
)]
pub async fn aggregates(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dashboards.aggregates(ctx.tenant_id, job_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/analysis/{job_id}/dashboard/exceptions",
    params(("job_id" = Uuid, Path, description = "Job id")),
    responses((status = 200, description = "Exception tables"), (status = 409, description = "Not ready")),
    tag = "Dashboard"
)]
pub async fn exceptions(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dashboards.exceptions(ctx.tenant_id, job_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/analysis/{job_id}/dashboard/gaps",
    params(("job_id" = Uuid, Path, description = "Job id")),
    responses((status = 200, description = "Gap analysis"), (status = 409, description = "Not ready")),
    tag = "Dashboard"
)]
pub async fn gaps(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dashboards.gaps(ctx.tenant_id, job_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/analysis/{job_id}/dashboard/threads",
    params(("job_id" = Uuid, Path, description = "Job id")),
    responses((status = 200, description = "Thread statistics"), (status = 409, description = "Not ready")),
    tag = "Dashboard"
)]
pub async fn threads(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dashboards.threads(ctx.tenant_id, job_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/analysis/{job_id}/dashboard/filters",
    params(("job_id" = Uuid, Path, description = "Job id")),
    responses((status = 200, description = "Filter complexity"), (status = 409, description = "Not ready")),
    tag = "Dashboard"
)]
pub async fn filters(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .dashboards
            .filter_complexity(ctx.tenant_id, job_id)
            .await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/analysis/{job_id}/dashboard/queued-calls",
    params(("job_id" = Uuid, Path, description = "Job id")),
    responses((status = 200, description = "Queued API calls"), (status = 409, description = "Not ready")),
    tag = "Dashboard"
)]
pub async fn queued_calls(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dashboards.queued_calls(ctx.tenant_id, job_id).await?))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DelayedEscalationParams {
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: i64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_min_delay() -> i64 {
    1_000
}
fn default_limit() -> u64 {
    100
}

#[utoipa::path(
    get,
    path = "/api/v1/analysis/{job_id}/dashboard/delayed-escalations",
    params(("job_id" = Uuid, Path, description = "Job id"), DelayedEscalationParams),
    responses((status = 200, description = "Delayed escalations"), (status = 409, description = "Not ready")),
    tag = "Dashboard"
)]
pub async fn delayed_escalations(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(job_id): Path<Uuid>,
    Query(params): Query<DelayedEscalationParams>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .dashboards
            .delayed_escalations(ctx.tenant_id, job_id, params.min_delay_ms, params.limit)
            .await?,
    ))
}
