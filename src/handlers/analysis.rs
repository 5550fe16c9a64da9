//! Analysis job lifecycle.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;
use validator::Validate;

use crate::middleware::TenantContext;
use crate::models::{AnalysisJob, CreateAnalysisRequest};
use crate::utils::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
}

fn default_page() -> i64 {
    1
}
fn default_size() -> i64 {
    50
}

/// Create a job from an uploaded `LogFile` and an optional flag bundle, then
/// submit it to the ingestion workers.
#[utoipa::path(
    post,
    path = "/api/v1/analysis",
    request_body = CreateAnalysisRequest,
    responses(
        (status = 201, description = "Job queued", body = AnalysisJob),
        (status = 400, description = "Invalid flag bundle"),
        (status = 404, description = "Unknown log file"),
    ),
    tag = "Analysis"
)]
pub async fn create_analysis(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<CreateAnalysisRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|err| ApiError::validation(err.to_string()))?;

    state
        .metadata
        .get_log_file(ctx.tenant_id, req.log_file_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("log file {}", req.log_file_id)))?;

    let job = state
        .metadata
        .create_job(ctx.tenant_id, req.log_file_id, req.options.unwrap_or_default())
        .await?;

    state.bus.publish_submit(ctx.tenant_id, job.id).await?;
    tracing::info!(tenant_id = %ctx.tenant_id, job_id = %job.id, "analysis job submitted");

    Ok((StatusCode::CREATED, Json(job)))
}

/// List jobs for the tenant, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/analysis",
    params(ListParams),
    responses((status = 200, description = "Jobs", body = [AnalysisJob])),
    tag = "Analysis"
)]
pub async fn list_analyses(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let size = params.size.clamp(1, 200);
    let offset = (params.page.max(1) - 1) * size;
    let jobs = state.metadata.list_jobs(ctx.tenant_id, size, offset).await?;
    Ok(Json(jobs))
}

/// Job detail.
#[utoipa::path(
    get,
    path = "/api/v1/analysis/{job_id}",
    params(("job_id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job", body = AnalysisJob),
        (status = 404, description = "Unknown job"),
    ),
    tag = "Analysis"
)]
pub async fn get_analysis(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .metadata
        .get_job(ctx.tenant_id, job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {}", job_id)))?;
    Ok(Json(job))
}

/// Request cancellation. The pipeline observes the flag between stages; the
/// job lands in `failed` with reason `cancelled`.
#[utoipa::path(
    post,
    path = "/api/v1/analysis/{job_id}/cancel",
    params(("job_id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 202, description = "Cancellation requested"),
        (status = 404, description = "Unknown or already terminal job"),
    ),
    tag = "Analysis"
)]
pub async fn cancel_analysis(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let requested = state.metadata.request_cancel(ctx.tenant_id, job_id).await?;
    if !requested {
        return Err(ApiError::not_found(format!("job {}", job_id)));
    }
    Ok(StatusCode::ACCEPTED)
}
