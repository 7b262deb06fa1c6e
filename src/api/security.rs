//! Security status API endpoint
//!
//! GET /api/v1/security/status - the caller's current security posture:
//! session bounds, lockout state, and recent sign-in attempts.

use axum::{extract::State, http::HeaderMap, routing::get, Json, Router};

use crate::api::middleware::{client_ip, ApiError, AppState, AuthenticatedUser};
use crate::services::auth::SecurityStatus;

/// Build the security router (requires auth middleware)
pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(status))
}

/// GET /api/v1/security/status
async fn status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
) -> Result<Json<SecurityStatus>, ApiError> {
    let ip = client_ip(&headers);
    let status = state
        .auth_service
        .security_status(&user.user, &user.claims.sid, &ip)
        .await?;
    Ok(Json(status))
}
