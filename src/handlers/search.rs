//! KQL search, autocomplete and histogram endpoints.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::middleware::TenantContext;
use crate::query::SearchParams;
use crate::utils::ApiError;
use crate::AppState;

/// KQL search over a completed job.
#[utoipa::path(
    get,
    path = "/api/v1/analysis/{job_id}/search",
    params(("job_id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Search results"),
        (status = 400, description = "KQL parse error"),
        (status = 409, description = "Job not complete"),
    ),
    tag = "Search"
)]
pub async fn search(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(job_id): Path<Uuid>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.searches.search(ctx.tenant_id, job_id, &params).await?))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AutocompleteParams {
    #[serde(default)]
    pub q: String,
}

/// Field catalogue, or value suggestions when the query ends in `field:`.
#[utoipa::path(
    get,
    path = "/api/v1/analysis/{job_id}/autocomplete",
    params(("job_id" = Uuid, Path, description = "Job id"), AutocompleteParams),
    responses((status = 200, description = "Suggestions")),
    tag = "Search"
)]
pub async fn autocomplete(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(job_id): Path<Uuid>,
    Query(params): Query<AutocompleteParams>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .searches
            .autocomplete(ctx.tenant_id, job_id, &params.q)
            .await?,
    ))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistogramParams {
    /// Bucket width in seconds; floors at one minute.
    #[serde(default = "default_interval")]
    pub interval_secs: u32,
}

fn default_interval() -> u32 {
    60
}

/// Bucketed counts per log type.
#[utoipa::path(
    get,
    path = "/api/v1/analysis/{job_id}/histogram",
    params(("job_id" = Uuid, Path, description = "Job id"), HistogramParams),
    responses((status = 200, description = "Histogram buckets")),
    tag = "Search"
)]
pub async fn histogram(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(job_id): Path<Uuid>,
    Query(params): Query<HistogramParams>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .searches
            .histogram(ctx.tenant_id, job_id, params.interval_secs)
            .await?,
    ))
}
