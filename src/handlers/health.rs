//! Liveness and dependency reachability.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub environment: String,
    pub dependencies: Dependencies,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Dependencies {
    pub metadata: String,
    pub olap: String,
    pub cache: String,
    pub bus: String,
    pub blob: String,
}

fn probe(result: crate::ApiResult<()>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(err) => format!("unreachable: {}", err.kind()),
    }
}

/// Liveness and storage reachability. Always 200; the body reports
/// per-dependency status.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service health", body = HealthResponse)),
    tag = "Health"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (metadata, olap, cache, bus, blob) = tokio::join!(
        state.metadata.ping(),
        state.olap.ping(),
        state.cache.ping(),
        state.bus.ping(),
        state.blob.ping(),
    );

    Json(HealthResponse {
        status: "ok",
        environment: state.config.environment.clone(),
        dependencies: Dependencies {
            metadata: probe(metadata),
            olap: probe(olap),
            cache: probe(cache),
            bus: probe(bus),
            blob: probe(blob),
        },
    })
}
