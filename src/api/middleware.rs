//! API middleware
//!
//! Contains:
//! - The shared application state
//! - The structured API error type and its HTTP status mapping
//! - Bearer authentication middleware (token verify + revocation check +
//!   session touch + role re-lookup)
//! - The general-API rate limit layer

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::repositories::UserRepository;
use crate::models::{AccessClaims, User};
use crate::services::auth::{AuthError, AuthService};
use crate::services::rate_limiter::{EndpointClass, RateLimiter};
use crate::services::session::SessionManager;
use crate::services::token::TokenService;

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
    pub users: Arc<dyn UserRepository>,
    pub tokens: Arc<TokenService>,
    pub sessions: Arc<SessionManager>,
    pub rate_limiter: Arc<RateLimiter>,
}

/// Authenticated caller extracted from the request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    pub claims: AccessClaims,
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
    #[serde(skip)]
    retry_after_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
            retry_after_secs: None,
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
            retry_after_secs: None,
        }
    }

    /// Attach a Retry-After hint (seconds) to the response
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" | "FRAUD_BLOCKED" => StatusCode::FORBIDDEN,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "ACCOUNT_LOCKED" => StatusCode::LOCKED,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let retry_after = self.retry_after_secs;
        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Validation(errors) => ApiError::with_details(
                "VALIDATION_ERROR",
                "Invalid input",
                serde_json::json!({ "errors": errors }),
            ),
            // Deliberately generic: no distinction between unknown email,
            // wrong password, or a revoked token
            AuthError::Authentication => ApiError::unauthorized("Invalid credentials"),
            AuthError::Authorization => ApiError::forbidden("Insufficient privileges"),
            AuthError::FraudBlocked { reasons } => ApiError::with_details(
                "FRAUD_BLOCKED",
                "Request blocked",
                serde_json::json!({ "reasons": reasons }),
            ),
            AuthError::AccountLocked { retry_after_secs } => ApiError::with_details(
                "ACCOUNT_LOCKED",
                "Account temporarily locked",
                serde_json::json!({ "retry_after_secs": retry_after_secs }),
            )
            .with_retry_after(retry_after_secs.max(0) as u64),
            AuthError::RateLimited { retry_after_ms } => ApiError::with_details(
                "RATE_LIMITED",
                "Too many requests",
                serde_json::json!({ "retry_after_ms": retry_after_ms }),
            )
            .with_retry_after(retry_after_ms.div_ceil(1000)),
            AuthError::Internal(e) => {
                // Full detail stays server-side
                tracing::error!("internal auth error: {:#}", e);
                ApiError::internal_error("Internal server error")
            }
        }
    }
}

/// Extract the bearer token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(String::from)
}

/// Extract the client IP: X-Forwarded-For first hop, then X-Real-IP
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(ip) = forwarded_str.split(',').next() {
                let ip = ip.trim();
                if !ip.is_empty() {
                    return Some(ip.to_string());
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

/// Client IP with a stable fallback for direct connections
pub fn client_ip(headers: &HeaderMap) -> String {
    extract_ip_address(headers).unwrap_or_else(|| "unknown".to_string())
}

/// Authentication middleware.
///
/// Verifies the bearer token's signature and expiry, rejects revoked
/// tokens, confirms the bound session is still valid (touching it to slide
/// the idle window), and re-reads the user so role and status come from the
/// store, not the token. A token failing signature verification is answered
/// exactly like a missing token.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    let claims = state
        .tokens
        .verify_access_token(&token)
        .map_err(|_| ApiError::unauthorized("Invalid credentials"))?;

    let revoked = state
        .tokens
        .is_revoked(&token)
        .await
        .map_err(|_| ApiError::internal_error("Internal server error"))?;
    if revoked {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let session_ok = state
        .sessions
        .is_valid(&claims.sid, claims.sub)
        .await
        .map_err(|_| ApiError::internal_error("Internal server error"))?;
    if !session_ok {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    // Slide the idle window on every authenticated request
    let _ = state.sessions.touch(&claims.sid).await;

    // Role and status are authoritative only via re-lookup
    let user = state
        .users
        .get_by_id(claims.sub)
        .await
        .map_err(|_| ApiError::internal_error("Internal server error"))?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;
    if !user.is_active() {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    request
        .extensions_mut()
        .insert(AuthenticatedUser { user, claims });
    Ok(next.run(request).await)
}

/// General-API rate limit middleware, keyed by client IP
pub async fn api_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(request.headers());
    let decision = state
        .rate_limiter
        .check_and_consume(EndpointClass::Api, &ip)
        .await;

    if !decision.allowed {
        return Err(ApiError::with_details(
            "RATE_LIMITED",
            "Too many requests",
            serde_json::json!({ "retry_after_ms": decision.retry_after_ms }),
        )
        .with_retry_after(decision.retry_after_ms.div_ceil(1000)));
    }

    Ok(next.run(request).await)
}
