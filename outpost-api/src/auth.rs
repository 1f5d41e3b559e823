//! Bearer token authentication.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::{ApiState, HttpError};

/// Rejects requests that do not carry `Authorization: Bearer <auth_token>`.
pub async fn require_token(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| HttpError::unauthorized("missing authorization header"))?;

    let token = header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| HttpError::unauthorized("invalid authorization format"))?;

    if !state.token_matches(token) {
        tracing::debug!(path = %request.uri().path(), "Rejected request with invalid token");
        return Err(HttpError::unauthorized("invalid token"));
    }

    Ok(next.run(request).await)
}
