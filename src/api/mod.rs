//! API layer - HTTP handlers and routing
//!
//! All HTTP endpoints of the account-security core:
//! - Auth endpoints (signup/signin/refresh/signout/password)
//! - Security status endpoint
//!
//! The auth endpoints carry their own narrow rate limit inside the
//! orchestrator; everything behind authentication additionally sits behind
//! the general-API rate limit layer.

pub mod auth;
pub mod middleware;
pub mod security;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use middleware::{ApiError, AppState, AuthenticatedUser};

/// Build the main API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Protected routes: bearer auth, then the general-API rate limit
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/security", security::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::api_rate_limit,
        ));

    Router::new()
        .nest("/auth", auth::public_router())
        .merge(protected_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(cors_origin.parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod e2e_tests {
    use super::*;
    use crate::config::{
        AuthConfig, FraudConfig, LockoutConfig, RateLimitConfig, RateWindow, SessionConfig,
    };
    use crate::db::repositories::{
        SqlxAuthAttemptRepository, SqlxLockoutRepository, SqlxRevocationRepository,
        SqlxSecurityEventRepository, SqlxSessionRepository, SqlxUserRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::services::auth::AuthService;
    use crate::services::events::SecurityEventLogger;
    use crate::services::fraud::FraudScorer;
    use crate::services::lockout::LockoutTracker;
    use crate::services::rate_limiter::RateLimiter;
    use crate::services::session::SessionManager;
    use crate::services::token::TokenService;
    use crate::services::EmailService;
    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use std::sync::Arc;

    const GOOD_PASSWORD: &str = "C0rrect!horse";
    const XFF: HeaderName = HeaderName::from_static("x-forwarded-for");

    fn wide_rate_limits() -> RateLimitConfig {
        RateLimitConfig {
            auth: RateWindow {
                window_secs: 900,
                max_requests: 100,
            },
            api: RateWindow {
                window_secs: 900,
                max_requests: 1000,
            },
            payment: RateWindow {
                window_secs: 60,
                max_requests: 3,
            },
        }
    }

    async fn test_server_with(
        rate_limits: RateLimitConfig,
        lockout_config: LockoutConfig,
    ) -> TestServer {
        let pool = create_test_pool().await.expect("Failed to create pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::boxed(pool.clone());
        let attempts = SqlxAuthAttemptRepository::boxed(pool.clone());
        let lockout = Arc::new(LockoutTracker::new(
            attempts.clone(),
            SqlxLockoutRepository::boxed(pool.clone()),
            lockout_config,
        ));
        let rate_limiter = Arc::new(RateLimiter::new(rate_limits));
        let fraud = Arc::new(FraudScorer::new(FraudConfig {
            risky_threshold: 50,
            block_threshold: 80,
            velocity_threshold: 1000,
        }));
        let sessions = Arc::new(SessionManager::new(
            SqlxSessionRepository::boxed(pool.clone()),
            SessionConfig {
                idle_minutes: 30,
                absolute_hours: 12,
            },
        ));
        let tokens = Arc::new(TokenService::new(
            &AuthConfig {
                access_secret: "access-secret-0123456789abcdef0123".to_string(),
                refresh_secret: "refresh-secret-0123456789abcdef012".to_string(),
                access_ttl_minutes: 15,
                refresh_ttl_days: 7,
                issuer: "journeo".to_string(),
            },
            SqlxRevocationRepository::boxed(pool.clone()),
        ));
        let events = Arc::new(SecurityEventLogger::new(SqlxSecurityEventRepository::boxed(
            pool.clone(),
        )));
        let email = Arc::new(EmailService::new(None));

        let auth_service = Arc::new(AuthService::new(
            users.clone(),
            attempts,
            lockout,
            rate_limiter.clone(),
            fraud,
            sessions.clone(),
            tokens.clone(),
            events,
            email,
            30,
        ));

        let state = AppState {
            auth_service,
            users,
            tokens,
            sessions,
            rate_limiter,
        };

        TestServer::new(build_router(state, "http://localhost:3000")).unwrap()
    }

    async fn test_server() -> TestServer {
        test_server_with(
            wide_rate_limits(),
            LockoutConfig {
                threshold: 5,
                window_minutes: 15,
                cooldown_minutes: 30,
            },
        )
        .await
    }

    async fn sign_up(server: &TestServer, email: &str) -> Value {
        let response = server
            .post("/api/v1/auth/signup")
            .json(&json!({ "email": email, "password": GOOD_PASSWORD }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }

    #[tokio::test]
    async fn test_signup_returns_token_pair() {
        let server = test_server().await;

        let body = sign_up(&server, "new@example.com").await;

        assert_eq!(body["user"]["email"], "new@example.com");
        assert_eq!(body["user"]["role"], "user");
        assert!(body["access_token"].as_str().unwrap().len() > 20);
        assert!(body["refresh_token"].as_str().unwrap().len() > 20);
    }

    #[tokio::test]
    async fn test_signup_weak_password_lists_all_missing_rules() {
        let server = test_server().await;

        let response = server
            .post("/api/v1/auth/signup")
            .json(&json!({ "email": "weak@example.com", "password": "weakpass" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        let errors = body["error"]["details"]["errors"].as_array().unwrap();
        // Missing uppercase, digit, and symbol
        assert_eq!(errors.len(), 3);
    }

    #[tokio::test]
    async fn test_signup_invalid_email_rejected() {
        let server = test_server().await;

        let response = server
            .post("/api/v1/auth/signup")
            .json(&json!({ "email": "not-an-email", "password": GOOD_PASSWORD }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_signin_roundtrip() {
        let server = test_server().await;
        sign_up(&server, "user@example.com").await;

        let response = server
            .post("/api/v1/auth/signin")
            .json(&json!({ "email": "user@example.com", "password": GOOD_PASSWORD }))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert!(body["access_token"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_signin_wrong_password_401_generic() {
        let server = test_server().await;
        sign_up(&server, "user@example.com").await;

        let response = server
            .post("/api/v1/auth/signin")
            .json(&json!({ "email": "user@example.com", "password": "Wrong!pass1" }))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        // Generic, non-revealing message
        assert_eq!(body["error"]["message"], "Invalid credentials");
    }

    #[tokio::test]
    async fn test_lockout_scenario_fifth_failure_locks_sixth_rejected() {
        let server = test_server().await;
        sign_up(&server, "victim@example.com").await;

        for _ in 0..5 {
            server
                .post("/api/v1/auth/signin")
                .add_header(XFF, HeaderValue::from_static("1.2.3.4"))
                .json(&json!({ "email": "victim@example.com", "password": "Wrong!pass1" }))
                .await
                .assert_status(StatusCode::UNAUTHORIZED);
        }

        // Correct password, same identity: still locked
        let response = server
            .post("/api/v1/auth/signin")
            .add_header(XFF, HeaderValue::from_static("1.2.3.4"))
            .json(&json!({ "email": "victim@example.com", "password": GOOD_PASSWORD }))
            .await;

        response.assert_status(StatusCode::LOCKED);
        let body: Value = response.json();
        assert!(body["error"]["details"]["retry_after_secs"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_signout_revokes_access_token() {
        let server = test_server().await;
        let auth = sign_up(&server, "user@example.com").await;
        let access = auth["access_token"].as_str().unwrap();
        let refresh = auth["refresh_token"].as_str().unwrap();

        // Protected endpoint works while signed in
        server
            .get("/api/v1/security/status")
            .authorization_bearer(access)
            .await
            .assert_status_ok();

        // Sign out
        server
            .post("/api/v1/auth/signout")
            .authorization_bearer(access)
            .json(&json!({ "refresh_token": refresh }))
            .await
            .assert_status(StatusCode::NO_CONTENT);

        // Same access token now rejected
        server
            .get("/api/v1/security/status")
            .authorization_bearer(access)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_returns_new_access_token() {
        let server = test_server().await;
        let auth = sign_up(&server, "user@example.com").await;
        let refresh = auth["refresh_token"].as_str().unwrap();

        let response = server
            .post("/api/v1/auth/refresh")
            .json(&json!({ "refresh_token": refresh }))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        let new_access = body["access_token"].as_str().unwrap();

        // The minted token authenticates
        server
            .get("/api/v1/security/status")
            .authorization_bearer(new_access)
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn test_refresh_with_access_token_rejected() {
        let server = test_server().await;
        let auth = sign_up(&server, "user@example.com").await;
        let access = auth["access_token"].as_str().unwrap();

        server
            .post("/api/v1/auth/refresh")
            .json(&json!({ "refresh_token": access }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_protected_endpoint_without_token_401() {
        let server = test_server().await;
        server
            .get("/api/v1/security/status")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_garbage_token_answered_like_missing_token() {
        let server = test_server().await;

        let missing = server.get("/api/v1/security/status").await;
        let garbage = server
            .get("/api/v1/security/status")
            .authorization_bearer("not.a.token")
            .await;

        missing.assert_status(StatusCode::UNAUTHORIZED);
        garbage.assert_status(StatusCode::UNAUTHORIZED);
        // Identical body: no oracle for the signing secret
        assert_eq!(missing.text(), garbage.text());
    }

    #[tokio::test]
    async fn test_api_rate_limit_trips_with_retry_after() {
        let server = test_server_with(
            RateLimitConfig {
                auth: RateWindow {
                    window_secs: 900,
                    max_requests: 100,
                },
                api: RateWindow {
                    window_secs: 900,
                    max_requests: 10,
                },
                payment: RateWindow {
                    window_secs: 60,
                    max_requests: 3,
                },
            },
            LockoutConfig {
                threshold: 5,
                window_minutes: 15,
                cooldown_minutes: 30,
            },
        )
        .await;
        let auth = sign_up(&server, "user@example.com").await;
        let access = auth["access_token"].as_str().unwrap();

        // Exactly max requests pass
        for _ in 0..10 {
            server
                .get("/api/v1/security/status")
                .authorization_bearer(access)
                .add_header(XFF, HeaderValue::from_static("1.2.3.4"))
                .await
                .assert_status_ok();
        }

        // max+1 is rejected with a Retry-After hint
        let response = server
            .get("/api/v1/security/status")
            .authorization_bearer(access)
            .add_header(XFF, HeaderValue::from_static("1.2.3.4"))
            .await;
        response.assert_status(StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
        let body: Value = response.json();
        assert!(body["error"]["details"]["retry_after_ms"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_security_status_reports_posture() {
        let server = test_server().await;
        let auth = sign_up(&server, "user@example.com").await;
        let access = auth["access_token"].as_str().unwrap();

        // One failed attempt to show up in the report
        server
            .post("/api/v1/auth/signin")
            .json(&json!({ "email": "user@example.com", "password": "Wrong!pass1" }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        let response = server
            .get("/api/v1/security/status")
            .authorization_bearer(access)
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["locked"], false);
        assert_eq!(body["failed_attempts_in_window"], 1);
        assert!(!body["recent_attempts"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_password_flow() {
        let server = test_server().await;
        let auth = sign_up(&server, "user@example.com").await;
        let access = auth["access_token"].as_str().unwrap();

        server
            .put("/api/v1/auth/password")
            .authorization_bearer(access)
            .json(&json!({
                "current_password": GOOD_PASSWORD,
                "new_password": "N3w!secret",
            }))
            .await
            .assert_status(StatusCode::NO_CONTENT);

        // Old password rejected, new accepted
        server
            .post("/api/v1/auth/signin")
            .json(&json!({ "email": "user@example.com", "password": GOOD_PASSWORD }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        server
            .post("/api/v1/auth/signin")
            .json(&json!({ "email": "user@example.com", "password": "N3w!secret" }))
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn test_auth_rate_limit_keyed_per_identity() {
        let server = test_server_with(
            RateLimitConfig {
                auth: RateWindow {
                    window_secs: 900,
                    max_requests: 3,
                },
                api: RateWindow {
                    window_secs: 900,
                    max_requests: 1000,
                },
                payment: RateWindow {
                    window_secs: 60,
                    max_requests: 3,
                },
            },
            LockoutConfig {
                threshold: 50,
                window_minutes: 15,
                cooldown_minutes: 30,
            },
        )
        .await;

        for _ in 0..3 {
            server
                .post("/api/v1/auth/signin")
                .add_header(XFF, HeaderValue::from_static("1.2.3.4"))
                .json(&json!({ "email": "a@example.com", "password": "Wrong!pass1" }))
                .await
                .assert_status(StatusCode::UNAUTHORIZED);
        }

        // Same ip+email: limited
        server
            .post("/api/v1/auth/signin")
            .add_header(XFF, HeaderValue::from_static("1.2.3.4"))
            .json(&json!({ "email": "a@example.com", "password": "Wrong!pass1" }))
            .await
            .assert_status(StatusCode::TOO_MANY_REQUESTS);

        // Different account from the same NAT'd ip: not penalized
        server
            .post("/api/v1/auth/signin")
            .add_header(XFF, HeaderValue::from_static("1.2.3.4"))
            .json(&json!({ "email": "b@example.com", "password": "Wrong!pass1" }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}
