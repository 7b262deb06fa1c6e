//! Authentication API endpoints
//!
//! Handles HTTP requests for the auth flows:
//! - POST /api/v1/auth/signup - Account creation
//! - POST /api/v1/auth/signin - Credential sign-in
//! - POST /api/v1/auth/refresh - Mint a new access token
//! - POST /api/v1/auth/signout - Revoke tokens and end the session
//! - PUT  /api/v1/auth/password - Change password (requires auth)

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{
    client_ip, extract_bearer_token, ApiError, AppState, AuthenticatedUser,
};
use crate::models::User;
use crate::services::auth::{SignInInput, SignUpInput};

/// Request body for account creation
#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
}

/// Request body for sign-in
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// Request body for token refresh
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Request body for sign-out
#[derive(Debug, Deserialize, Default)]
pub struct SignOutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Request body for changing password
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub access_token: String,
    pub refresh_token: String,
}

/// Response for token refresh
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

/// Response for user info
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            role: user.role.to_string(),
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(sign_up))
        .route("/signin", post(sign_in))
        .route("/refresh", post(refresh))
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/signout", post(sign_out))
        .route("/password", put(change_password))
}

/// POST /api/v1/auth/signup - Account creation
async fn sign_up(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let input = SignUpInput {
        email: body.email,
        password: body.password,
        ip_address: client_ip(&headers),
        user_agent: user_agent(&headers),
    };

    let outcome = state.auth_service.sign_up(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: outcome.user.into(),
            access_token: outcome.access_token,
            refresh_token: outcome.refresh_token,
        }),
    ))
}

/// POST /api/v1/auth/signin - Credential sign-in
async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SignInRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let input = SignInInput {
        email: body.email,
        password: body.password,
        ip_address: client_ip(&headers),
        user_agent: user_agent(&headers),
    };

    let outcome = state.auth_service.sign_in(input).await?;

    Ok(Json(AuthResponse {
        user: outcome.user.into(),
        access_token: outcome.access_token,
        refresh_token: outcome.refresh_token,
    }))
}

/// POST /api/v1/auth/refresh - Mint a new access token
async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let (access_token, _claims) = state.auth_service.refresh(&body.refresh_token).await?;
    Ok(Json(RefreshResponse { access_token }))
}

/// POST /api/v1/auth/signout - Revoke tokens and end the session
///
/// Requires authentication.
async fn sign_out(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    headers: HeaderMap,
    body: Option<Json<SignOutRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let access_token = extract_bearer_token(&headers)
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;
    let refresh_token = body.and_then(|Json(b)| b.refresh_token);

    state
        .auth_service
        .sign_out(&access_token, refresh_token.as_deref())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/auth/password - Change the caller's password
///
/// Requires authentication.
async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .auth_service
        .change_password(user.user.id, &body.current_password, &body.new_password)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(String::from)
}
