//! Saved searches.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use std::sync::Arc;
use uuid::Uuid;

use crate::middleware::TenantContext;
use crate::models::{CreateSavedSearchRequest, SavedSearch};
use crate::utils::ApiError;
use crate::AppState;

#[utoipa::path(
    get,
    path = "/api/v1/search/saved",
    responses((status = 200, description = "Saved searches", body = [SavedSearch])),
    tag = "Search"
)]
pub async fn list_saved_searches(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .metadata
            .list_saved_searches(ctx.tenant_id, &ctx.user_id)
            .await?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/search/saved",
    request_body = CreateSavedSearchRequest,
    responses(
        (status = 201, description = "Saved", body = SavedSearch),
        (status = 400, description = "Query does not parse"),
    ),
    tag = "Search"
)]
pub async fn create_saved_search(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<CreateSavedSearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // A saved query must at least parse; catch typos at save time.
    crate::kql::compile(&req.query)?;
    let saved = state
        .metadata
        .create_saved_search(ctx.tenant_id, &ctx.user_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/search/saved/{id}",
    params(("id" = Uuid, Path, description = "Saved search id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown saved search"),
    ),
    tag = "Search"
)]
pub async fn delete_saved_search(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.metadata.delete_saved_search(ctx.tenant_id, id).await? {
        return Err(ApiError::not_found(format!("saved search {}", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}
