//! Bearer token authentication middleware
//!
//! Resolves `Authorization: Bearer <token>` through the session service and
//! stores the [`Actor`] in request extensions. `/health` is not behind this
//! layer.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use lgx_common::api::Actor;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::AppState;

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    let actor: Actor = state
        .sessions
        .authenticate(&token)
        .await?
        .ok_or_else(|| {
            warn!("Rejected unknown or expired session");
            ApiError::Unauthorized("Invalid or expired session".to_string())
        })?;

    debug!(user_id = %actor.user_id, role = %actor.role, "Authenticated");
    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}
