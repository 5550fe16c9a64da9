//! Job progress relay: bridges `jobs.<tenant>.progress` bus events to
//! connected browser clients over SSE. Delivery is best-effort; reconnection
//! is the client's responsibility.

use axum::response::sse::Event;
use axum::response::IntoResponse;
use axum::{extract::State, Extension};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;

use crate::middleware::TenantContext;
use crate::utils::ApiError;
use crate::AppState;

use super::ai::sse_response;

#[utoipa::path(
    get,
    path = "/api/v1/events/jobs",
    responses((status = 200, description = "SSE stream of job progress events", content_type = "text/event-stream")),
    tag = "Events"
)]
pub async fn job_events(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<impl IntoResponse, ApiError> {
    let progress = state.bus.subscribe_progress(ctx.tenant_id).await?;

    let stream = progress.map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, Infallible>(Event::default().event("progress").data(data))
    });

    Ok(sse_response(stream))
}
