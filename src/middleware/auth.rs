use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::utils::{ApiError, JwtUtil};

/// Resolved tenant scope of one request, lifted from the bearer token the
/// identity provider issued. Handlers read this from request extensions; a
/// request that reaches a handler without one was a middleware bug, so
/// extraction failures are `unauthorized`, never a panic.
#[derive(Clone, Debug)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub user_id: String,
}

#[derive(Clone)]
pub struct AuthState {
    pub jwt_util: Arc<JwtUtil>,
}

/// Authentication middleware.
/// 1. Verify the bearer JWT
/// 2. Lift (tenant_id, user_id) into a `TenantContext` request extension
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

    let claims = state.jwt_util.verify_token(token)?;

    let tenant_id: Uuid = claims
        .tenant_id
        .parse()
        .map_err(|_| ApiError::unauthorized("Token carries no valid tenant"))?;

    req.extensions_mut()
        .insert(TenantContext { tenant_id, user_id: claims.sub });

    Ok(next.run(req).await)
}
