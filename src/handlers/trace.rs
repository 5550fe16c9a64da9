//! Trace reconstruction endpoint.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use std::sync::Arc;
use uuid::Uuid;

use crate::middleware::TenantContext;
use crate::utils::ApiError;
use crate::AppState;

/// All entries correlated to a trace (or RPC) id, ordered by timestamp and
/// grouped by the RPC hierarchy.
#[utoipa::path(
    get,
    path = "/api/v1/analysis/{job_id}/trace/{trace_id}",
    params(
        ("job_id" = Uuid, Path, description = "Job id"),
        ("trace_id" = String, Path, description = "Trace or RPC id"),
    ),
    responses(
        (status = 200, description = "Reconstructed trace"),
        (status = 404, description = "No entries for this id"),
    ),
    tag = "Trace"
)]
pub async fn trace(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path((job_id, trace_id)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .traces
            .reconstruct(ctx.tenant_id, job_id, &trace_id)
            .await?,
    ))
}
