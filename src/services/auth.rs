//! Authentication orchestrator
//!
//! Composes the rate limiter, lockout tracker, credential validator, fraud
//! scorer, token service, and session manager into the sign-up / sign-in /
//! refresh / sign-out flows. Every rejection path writes a security event
//! with full detail; the client only ever sees the generic, non-revealing
//! message for its status code.
//!
//! Sign-in pipeline: rate-limit gate -> lockout check -> credential
//! verification -> fraud assessment -> token issue + session create. A
//! failed credential check always records the attempt before returning, so
//! lockout counting cannot be bypassed by an early return.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::db::repositories::{AuthAttemptRepository, UserRepository};
use crate::models::{
    AccessClaims, SecurityEventActor, Session, Severity, User, UserRole,
};
use crate::services::email::EmailService;
use crate::services::events::SecurityEventLogger;
use crate::services::fraud::{ActivitySignals, FraudScorer};
use crate::services::lockout::LockoutTracker;
use crate::services::password::{hash_password, verify_password};
use crate::services::rate_limiter::{signin_key, EndpointClass, RateLimiter};
use crate::services::session::SessionManager;
use crate::services::token::{TokenError, TokenService};
use crate::services::validator::{
    check_password_leak, sanitize, validate_email, validate_password_strength, LeakCheck,
};

/// Window over which request velocity is measured for fraud scoring
const VELOCITY_WINDOW_MINUTES: i64 = 5;

/// Error types for the authentication flows. Each maps 1:1 to an HTTP
/// status at the API layer.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed input (400); carries every violated rule
    #[error("Validation failed")]
    Validation(Vec<String>),

    /// Bad credential or invalid/expired/revoked token (401). Deliberately
    /// carries no detail.
    #[error("Authentication failed")]
    Authentication,

    /// Valid identity, insufficient role (403)
    #[error("Not authorized")]
    Authorization,

    /// Risk score over the hard threshold (403)
    #[error("Request blocked")]
    FraudBlocked { reasons: Vec<String> },

    /// Account locked (423)
    #[error("Account locked")]
    AccountLocked { retry_after_secs: i64 },

    /// Rate limited (429)
    #[error("Too many requests")]
    RateLimited { retry_after_ms: u64 },

    /// Unexpected failure (500); full detail goes to the event log only
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Invalid | TokenError::Revoked => AuthError::Authentication,
            TokenError::Internal(e) => AuthError::Internal(e),
        }
    }
}

/// Sign-up request data
#[derive(Debug, Clone)]
pub struct SignUpInput {
    pub email: String,
    pub password: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
}

/// Sign-in request data
#[derive(Debug, Clone)]
pub struct SignInInput {
    pub email: String,
    pub password: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
}

/// Successful authentication outcome: the session plus the token pair
#[derive(Debug, Clone)]
pub struct AuthTokens {
    pub user: User,
    pub session: Session,
    pub access_token: String,
    pub refresh_token: String,
}

/// The caller's current security posture, for the status endpoint
#[derive(Debug, Serialize)]
pub struct SecurityStatus {
    pub session_id: String,
    pub session_created_at: String,
    pub session_expires_at: String,
    pub locked: bool,
    pub failed_attempts_in_window: u32,
    pub recent_attempts: Vec<AttemptSummary>,
}

#[derive(Debug, Serialize)]
pub struct AttemptSummary {
    pub success: bool,
    pub ip_address: String,
    pub failure_reason: Option<String>,
    pub at: String,
}

/// Authentication orchestrator service
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    attempts: Arc<dyn AuthAttemptRepository>,
    lockout: Arc<LockoutTracker>,
    rate_limiter: Arc<RateLimiter>,
    fraud: Arc<FraudScorer>,
    sessions: Arc<SessionManager>,
    tokens: Arc<TokenService>,
    events: Arc<SecurityEventLogger>,
    email: Arc<EmailService>,
    http_client: reqwest::Client,
    lockout_cooldown_minutes: i64,
    breach_check_enabled: bool,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserRepository>,
        attempts: Arc<dyn AuthAttemptRepository>,
        lockout: Arc<LockoutTracker>,
        rate_limiter: Arc<RateLimiter>,
        fraud: Arc<FraudScorer>,
        sessions: Arc<SessionManager>,
        tokens: Arc<TokenService>,
        events: Arc<SecurityEventLogger>,
        email: Arc<EmailService>,
        lockout_cooldown_minutes: i64,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(3))
            .build()
            .unwrap_or_default();
        Self {
            users,
            attempts,
            lockout,
            rate_limiter,
            fraud,
            sessions,
            tokens,
            events,
            email,
            http_client,
            lockout_cooldown_minutes,
            breach_check_enabled: false,
        }
    }

    /// Enable the outbound breach-database lookup on sign-up
    pub fn with_breach_check(mut self) -> Self {
        self.breach_check_enabled = true;
        self
    }

    fn actor(&self, user_id: Option<i64>, ip: &str, user_agent: Option<&str>) -> SecurityEventActor {
        SecurityEventActor {
            user_id,
            ip_address: Some(ip.to_string()),
            user_agent: user_agent.map(String::from),
        }
    }

    /// Rate-limit gate shared by the auth flows. Writes the event on denial.
    async fn rate_gate(
        &self,
        key: &str,
        email: &str,
        ip: &str,
        user_agent: Option<&str>,
    ) -> Result<(), AuthError> {
        let decision = self
            .rate_limiter
            .check_and_consume(EndpointClass::Auth, key)
            .await;
        if decision.allowed {
            return Ok(());
        }

        self.events
            .log(
                "rate_limited",
                Severity::Medium,
                "authentication endpoint rate limit exceeded",
                self.actor(None, ip, user_agent),
                json!({ "email": email, "retry_after_ms": decision.retry_after_ms }),
            )
            .await;

        Err(AuthError::RateLimited {
            retry_after_ms: decision.retry_after_ms,
        })
    }

    /// Register a new account and sign it in.
    pub async fn sign_up(&self, input: SignUpInput) -> Result<AuthTokens, AuthError> {
        let email = sanitize(&input.email).to_lowercase();
        let user_agent = input.user_agent.as_deref();

        self.rate_gate(&input.ip_address, &email, &input.ip_address, user_agent)
            .await?;

        let mut errors = Vec::new();
        if !validate_email(&email) {
            errors.push("Invalid email address".to_string());
        }
        let strength = validate_password_strength(&input.password);
        errors.extend(strength.errors);
        if !errors.is_empty() {
            return Err(AuthError::Validation(errors));
        }

        // Defense-in-depth: breach lookup fails open
        let leak = if self.breach_check_enabled {
            check_password_leak(&self.http_client, &input.password).await
        } else {
            LeakCheck::Clear
        };
        match leak {
            LeakCheck::Leaked => {
                return Err(AuthError::Validation(vec![
                    "Password has appeared in a known data breach".to_string(),
                ]));
            }
            LeakCheck::Degraded => {
                self.events
                    .log(
                        "breach_check_degraded",
                        Severity::Low,
                        "breach database lookup failed; continuing without it",
                        self.actor(None, &input.ip_address, user_agent),
                        json!({ "email": email }),
                    )
                    .await;
            }
            LeakCheck::Clear => {}
        }

        if self
            .users
            .get_by_email(&email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(AuthError::Validation(vec![
                "Email is already registered".to_string(),
            ]));
        }

        let password_hash = hash_password(&input.password).context("Failed to hash password")?;
        let user = self
            .users
            .create(&User::new(email.clone(), password_hash, UserRole::User))
            .await
            .context("Failed to create user")?;

        let outcome = self
            .issue_for(&user, &input.ip_address, user_agent)
            .await?;

        self.events
            .log(
                "signup",
                Severity::Low,
                "account created",
                self.actor(Some(user.id), &input.ip_address, user_agent),
                json!({ "email": email }),
            )
            .await;

        Ok(outcome)
    }

    /// Authenticate credentials and issue a token pair.
    pub async fn sign_in(&self, input: SignInInput) -> Result<AuthTokens, AuthError> {
        let email = input.email.trim().to_lowercase();
        let ip = input.ip_address.as_str();
        let user_agent = input.user_agent.as_deref();

        // Keyed by ip:email so stuffing one account doesn't penalize a
        // whole NAT'd address
        self.rate_gate(&signin_key(ip, &email), &email, ip, user_agent)
            .await?;

        if let Some(until) = self
            .lockout
            .locked_until(&email, ip)
            .await
            .context("Failed to check lockout")?
        {
            self.events
                .log(
                    "login_rejected_locked",
                    Severity::High,
                    "sign-in attempt against locked account",
                    self.actor(None, ip, user_agent),
                    json!({ "email": email, "locked_until": until.to_rfc3339() }),
                )
                .await;
            let retry_after_secs = (until - Utc::now()).num_seconds().max(0);
            return Err(AuthError::AccountLocked { retry_after_secs });
        }

        let user = match self.verify_credentials(&email, &input.password).await? {
            Ok(user) => user,
            Err(reason) => {
                // The attempt is recorded before the early return, so
                // lockout counting is never bypassed
                return Err(self
                    .reject_credentials(&email, ip, user_agent, reason)
                    .await);
            }
        };

        let assessment = self.fraud.score(&self.gather_signals(&email, ip, user_agent).await);
        if assessment.degraded {
            self.events
                .log(
                    "fraud_assessment_degraded",
                    Severity::Low,
                    "fraud signals partially unavailable; scored what was available",
                    self.actor(Some(user.id), ip, user_agent),
                    json!({ "score": assessment.risk_score }),
                )
                .await;
        }
        if assessment.blocked {
            self.fraud.flag_ip(ip);
            self.lockout
                .record_attempt(&email, ip, false, Some("fraud blocked"), user_agent)
                .await
                .context("Failed to record attempt")?;
            self.events
                .log(
                    "fraud_blocked",
                    Severity::Critical,
                    "sign-in blocked by fraud score",
                    self.actor(Some(user.id), ip, user_agent),
                    json!({
                        "score": assessment.risk_score,
                        "reasons": assessment.reasons,
                        "degraded": assessment.degraded,
                    }),
                )
                .await;
            return Err(AuthError::FraudBlocked {
                reasons: assessment.reasons,
            });
        }
        if assessment.is_risky {
            self.events
                .log(
                    "fraud_flagged",
                    Severity::Medium,
                    "sign-in allowed with elevated fraud score",
                    self.actor(Some(user.id), ip, user_agent),
                    json!({
                        "score": assessment.risk_score,
                        "reasons": assessment.reasons,
                    }),
                )
                .await;
        }

        // Success: the recorded attempt also clears the pair's failure
        // counters and any lock
        self.lockout
            .record_attempt(&email, ip, true, None, user_agent)
            .await
            .context("Failed to record attempt")?;

        let outcome = self.issue_for(&user, ip, user_agent).await?;

        self.events
            .log(
                "login_success",
                Severity::Low,
                "user signed in",
                self.actor(Some(user.id), ip, user_agent),
                json!({ "email": email, "session_id": outcome.session.id }),
            )
            .await;

        Ok(outcome)
    }

    /// Mint a new access token from a refresh token.
    ///
    /// The role is re-read from the store; the role inside an old token is
    /// never trusted.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(String, AccessClaims), AuthError> {
        let claims = self.tokens.verify_refresh_token(refresh_token)?;

        if self.tokens.is_revoked(refresh_token).await? {
            return Err(AuthError::Authentication);
        }

        if !self
            .sessions
            .is_valid(&claims.sid, claims.sub)
            .await
            .context("Failed to check session")?
        {
            return Err(AuthError::Authentication);
        }

        let user = self
            .users
            .get_by_id(claims.sub)
            .await
            .context("Failed to load user")?
            .ok_or(AuthError::Authentication)?;
        if !user.is_active() {
            return Err(AuthError::Authentication);
        }

        self.sessions
            .touch(&claims.sid)
            .await
            .context("Failed to touch session")?;

        let access_token =
            self.tokens
                .issue_access_token(user.id, &user.email, &user.role.to_string(), &claims.sid)?;
        let access_claims = self.tokens.verify_access_token(&access_token)?;

        self.events
            .log(
                "token_refreshed",
                Severity::Low,
                "access token refreshed",
                SecurityEventActor {
                    user_id: Some(user.id),
                    ip_address: None,
                    user_agent: None,
                },
                json!({ "session_id": claims.sid }),
            )
            .await;

        Ok((access_token, access_claims))
    }

    /// Revoke both tokens and invalidate the session.
    pub async fn sign_out(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), AuthError> {
        let claims = self
            .tokens
            .verify_access_token(access_token)
            .map_err(|_| AuthError::Authentication)?;

        self.tokens.revoke(access_token, "signout").await?;
        if let Some(refresh) = refresh_token {
            if let Err(e) = self.tokens.revoke(refresh, "signout").await {
                // A garbled refresh token doesn't abort the signout
                tracing::warn!("refresh token revocation failed on signout: {}", e);
            }
        }
        self.sessions
            .invalidate(&claims.sid, "signout")
            .await
            .context("Failed to invalidate session")?;

        self.events
            .log(
                "signout",
                Severity::Low,
                "user signed out",
                SecurityEventActor {
                    user_id: Some(claims.sub),
                    ip_address: None,
                    user_agent: None,
                },
                json!({ "session_id": claims.sid }),
            )
            .await;

        Ok(())
    }

    /// Change the authenticated user's password and send a security notice.
    pub async fn change_password(
        &self,
        user_id: i64,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let user = self
            .users
            .get_by_id(user_id)
            .await
            .context("Failed to load user")?
            .ok_or(AuthError::Authentication)?;

        let current_ok = verify_password(current_password, &user.password_hash)
            .context("Failed to verify password")?;
        if !current_ok {
            return Err(AuthError::Authentication);
        }

        let strength = validate_password_strength(new_password);
        if !strength.valid {
            return Err(AuthError::Validation(strength.errors));
        }

        let new_hash = hash_password(new_password).context("Failed to hash password")?;
        self.users
            .update_password(user_id, &new_hash)
            .await
            .context("Failed to update password")?;

        self.events
            .log(
                "password_changed",
                Severity::Medium,
                "password changed",
                SecurityEventActor {
                    user_id: Some(user_id),
                    ip_address: None,
                    user_agent: None,
                },
                json!({}),
            )
            .await;

        self.email.send_password_change_notice(&user.email).await;

        Ok(())
    }

    /// Current security posture for the authenticated caller.
    pub async fn security_status(
        &self,
        user: &User,
        session_id: &str,
        ip: &str,
    ) -> Result<SecurityStatus, AuthError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .context("Failed to load session")?
            .ok_or(AuthError::Authentication)?;

        let locked = self
            .lockout
            .is_locked(&user.email, ip)
            .await
            .context("Failed to check lockout")?;
        let failed = self
            .lockout
            .failed_count_in_window(&user.email, ip)
            .await
            .context("Failed to count failures")?;

        let recent = self
            .attempts
            .recent_for_email(&user.email, 10)
            .await
            .context("Failed to list attempts")?
            .into_iter()
            .map(|a| AttemptSummary {
                success: a.success,
                ip_address: a.ip_address,
                failure_reason: a.failure_reason,
                at: a.created_at.to_rfc3339(),
            })
            .collect();

        Ok(SecurityStatus {
            session_id: session.id,
            session_created_at: session.created_at.to_rfc3339(),
            session_expires_at: session.expires_at.to_rfc3339(),
            locked,
            failed_attempts_in_window: failed,
            recent_attempts: recent,
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Check email+password. `Ok(Err(reason))` is a normal credential
    /// failure; the outer error is a store fault.
    async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<std::result::Result<User, &'static str>, AuthError> {
        let user = match self
            .users
            .get_by_email(email)
            .await
            .context("Failed to look up user")?
        {
            Some(user) => user,
            None => return Ok(Err("unknown email")),
        };

        let password_ok = verify_password(password, &user.password_hash)
            .context("Failed to verify password")?;
        if !password_ok {
            return Ok(Err("wrong password"));
        }

        if user.is_suspended() {
            return Ok(Err("account suspended"));
        }

        Ok(Ok(user))
    }

    /// Record the failed attempt (possibly triggering a lock), write the
    /// event, send the lockout notice, and produce the generic 401.
    async fn reject_credentials(
        &self,
        email: &str,
        ip: &str,
        user_agent: Option<&str>,
        reason: &'static str,
    ) -> AuthError {
        let lock = match self
            .lockout
            .record_attempt(email, ip, false, Some(reason), user_agent)
            .await
        {
            Ok(lock) => lock,
            Err(e) => {
                // The primary gate fails closed: a store fault here is a 500
                return AuthError::Internal(e);
            }
        };

        self.events
            .log(
                "login_failed",
                Severity::Medium,
                "sign-in rejected",
                self.actor(None, ip, user_agent),
                json!({ "email": email, "reason": reason }),
            )
            .await;

        if let Some(lock) = lock {
            self.events
                .log(
                    "account_locked",
                    Severity::High,
                    "failure threshold reached; account locked",
                    self.actor(None, ip, user_agent),
                    json!({
                        "email": email,
                        "locked_until": lock.locked_until.to_rfc3339(),
                        "trigger_count": lock.trigger_count,
                    }),
                )
                .await;
            self.email
                .send_lockout_notice(email, self.lockout_cooldown_minutes)
                .await;
        }

        AuthError::Authentication
    }

    /// Fraud signals for an identity. Lookups fail open: an error leaves
    /// the signal unset and marks the assessment degraded.
    async fn gather_signals(
        &self,
        email: &str,
        ip: &str,
        user_agent: Option<&str>,
    ) -> ActivitySignals {
        let since = Utc::now() - Duration::minutes(VELOCITY_WINDOW_MINUTES);

        let (recent_request_count, request_count_lookup_failed) =
            match self.attempts.count_since(email, since).await {
                Ok(count) => (Some(count), false),
                Err(e) => {
                    tracing::warn!("velocity lookup failed: {}", e);
                    (None, true)
                }
            };

        let (seconds_since_last_attempt, last_attempt_lookup_failed) =
            match self.attempts.last_attempt_at(email).await {
                Ok(Some(at)) => (Some((Utc::now() - at).num_seconds()), false),
                Ok(None) => (None, false),
                Err(e) => {
                    tracing::warn!("last-attempt lookup failed: {}", e);
                    (None, true)
                }
            };

        ActivitySignals {
            recent_request_count,
            seconds_since_last_attempt,
            last_attempt_lookup_failed,
            request_count_lookup_failed,
            ip_address: ip.to_string(),
            user_agent: user_agent.map(String::from),
        }
    }

    /// Create the session and mint the token pair
    async fn issue_for(
        &self,
        user: &User,
        ip: &str,
        user_agent: Option<&str>,
    ) -> Result<AuthTokens, AuthError> {
        let session = self
            .sessions
            .create_session(user.id, Some(ip), user_agent)
            .await
            .context("Failed to create session")?;

        let access_token = self.tokens.issue_access_token(
            user.id,
            &user.email,
            &user.role.to_string(),
            &session.id,
        )?;
        let refresh_token = self.tokens.issue_refresh_token(user.id, &session.id)?;

        Ok(AuthTokens {
            user: user.clone(),
            session,
            access_token,
            refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, FraudConfig, LockoutConfig, RateLimitConfig, RateWindow, SessionConfig};
    use crate::db::repositories::{
        SqlxAuthAttemptRepository, SqlxLockoutRepository, SqlxRevocationRepository,
        SqlxSecurityEventRepository, SqlxSessionRepository, SqlxUserRepository,
    };
    use crate::db::{create_test_pool, migrations};

    const GOOD_PASSWORD: &str = "C0rrect!horse";
    const AGENT: &str = "Mozilla/5.0 (Macintosh)";

    async fn test_service() -> AuthService {
        test_service_with(LockoutConfig {
            threshold: 5,
            window_minutes: 15,
            cooldown_minutes: 30,
        })
        .await
    }

    async fn test_service_with(lockout_config: LockoutConfig) -> AuthService {
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
        // Generous limits so rate limiting only trips where a test wants it
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
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
        }));
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

        AuthService::new(
            users,
            attempts,
            lockout,
            rate_limiter,
            fraud,
            sessions,
            tokens,
            events,
            email,
            30,
        )
    }

    fn signup(email: &str) -> SignUpInput {
        SignUpInput {
            email: email.to_string(),
            password: GOOD_PASSWORD.to_string(),
            ip_address: "1.2.3.4".to_string(),
            user_agent: Some(AGENT.to_string()),
        }
    }

    fn signin(email: &str, password: &str) -> SignInInput {
        SignInInput {
            email: email.to_string(),
            password: password.to_string(),
            ip_address: "1.2.3.4".to_string(),
            user_agent: Some(AGENT.to_string()),
        }
    }

    #[tokio::test]
    async fn test_sign_up_issues_token_pair() {
        let service = test_service().await;

        let outcome = service.sign_up(signup("new@example.com")).await.unwrap();

        assert_eq!(outcome.user.email, "new@example.com");
        assert_eq!(outcome.user.role, UserRole::User);
        assert!(outcome.session.active);
        assert!(!outcome.access_token.is_empty());
        assert!(!outcome.refresh_token.is_empty());
    }

    #[tokio::test]
    async fn test_sign_up_weak_password_lists_every_violation() {
        let service = test_service().await;

        let mut input = signup("weak@example.com");
        input.password = "weakpass".to_string();

        match service.sign_up(input).await {
            Err(AuthError::Validation(errors)) => {
                // Missing uppercase, digit, and symbol: all three reported
                assert_eq!(errors.len(), 3);
                assert!(errors.iter().any(|e| e.contains("uppercase")));
                assert!(errors.iter().any(|e| e.contains("digit")));
                assert!(errors.iter().any(|e| e.contains("special character")));
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_sign_up_duplicate_email_rejected() {
        let service = test_service().await;
        service.sign_up(signup("dup@example.com")).await.unwrap();

        match service.sign_up(signup("dup@example.com")).await {
            Err(AuthError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("already registered")));
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_sign_in_with_correct_credentials() {
        let service = test_service().await;
        service.sign_up(signup("user@example.com")).await.unwrap();

        let outcome = service
            .sign_in(signin("user@example.com", GOOD_PASSWORD))
            .await
            .unwrap();
        assert_eq!(outcome.user.email, "user@example.com");
    }

    #[tokio::test]
    async fn test_sign_in_wrong_password_is_generic_401() {
        let service = test_service().await;
        service.sign_up(signup("user@example.com")).await.unwrap();

        let result = service.sign_in(signin("user@example.com", "Wrong!pass1")).await;
        assert!(matches!(result, Err(AuthError::Authentication)));
    }

    #[tokio::test]
    async fn test_sign_in_unknown_email_is_generic_401() {
        let service = test_service().await;

        let result = service.sign_in(signin("ghost@example.com", GOOD_PASSWORD)).await;
        assert!(matches!(result, Err(AuthError::Authentication)));
    }

    #[tokio::test]
    async fn test_lockout_after_threshold_failures() {
        let service = test_service().await;
        service.sign_up(signup("victim@example.com")).await.unwrap();

        for _ in 0..5 {
            let result = service
                .sign_in(signin("victim@example.com", "Wrong!pass1"))
                .await;
            assert!(matches!(result, Err(AuthError::Authentication)));
        }

        // Sixth attempt with the CORRECT password still rejected as locked
        let result = service
            .sign_in(signin("victim@example.com", GOOD_PASSWORD))
            .await;
        match result {
            Err(AuthError::AccountLocked { retry_after_secs }) => {
                assert!(retry_after_secs > 0);
                assert!(retry_after_secs <= 30 * 60);
            }
            other => panic!("expected locked, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_lockout_scoped_to_ip() {
        let service = test_service_with(LockoutConfig {
            threshold: 2,
            window_minutes: 15,
            cooldown_minutes: 30,
        })
        .await;
        service.sign_up(signup("user@example.com")).await.unwrap();

        for _ in 0..2 {
            let _ = service
                .sign_in(signin("user@example.com", "Wrong!pass1"))
                .await;
        }

        // Same account from a different address still gets through
        let mut from_elsewhere = signin("user@example.com", GOOD_PASSWORD);
        from_elsewhere.ip_address = "9.9.9.9".to_string();
        assert!(service.sign_in(from_elsewhere).await.is_ok());
    }

    #[tokio::test]
    async fn test_successful_sign_in_clears_failures() {
        let service = test_service_with(LockoutConfig {
            threshold: 3,
            window_minutes: 15,
            cooldown_minutes: 30,
        })
        .await;
        service.sign_up(signup("user@example.com")).await.unwrap();

        for _ in 0..2 {
            let _ = service
                .sign_in(signin("user@example.com", "Wrong!pass1"))
                .await;
        }
        service
            .sign_in(signin("user@example.com", GOOD_PASSWORD))
            .await
            .unwrap();

        // Success reset the counter: one more failure is far from the
        // threshold and must not lock
        let _ = service
            .sign_in(signin("user@example.com", "Wrong!pass1"))
            .await;
        let result = service
            .sign_in(signin("user@example.com", GOOD_PASSWORD))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_trips_with_retry_hint() {
        let pool_service = test_service().await;
        // Replace with a tight limiter: 2 per window
        let service = AuthService {
            rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig {
                auth: RateWindow {
                    window_secs: 900,
                    max_requests: 2,
                },
                api: RateWindow {
                    window_secs: 900,
                    max_requests: 100,
                },
                payment: RateWindow {
                    window_secs: 60,
                    max_requests: 3,
                },
            })),
            ..pool_service
        };
        service.sign_up(signup("user@example.com")).await.unwrap();

        let _ = service.sign_in(signin("user@example.com", "Wrong!pass1")).await;
        let _ = service.sign_in(signin("user@example.com", "Wrong!pass1")).await;

        match service.sign_in(signin("user@example.com", GOOD_PASSWORD)).await {
            Err(AuthError::RateLimited { retry_after_ms }) => {
                assert!(retry_after_ms > 0);
            }
            other => panic!("expected rate limited, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_refresh_mints_new_access_token() {
        let service = test_service().await;
        let outcome = service.sign_up(signup("user@example.com")).await.unwrap();

        let (access, claims) = service.refresh(&outcome.refresh_token).await.unwrap();
        assert!(!access.is_empty());
        assert_eq!(claims.sub, outcome.user.id);
        assert_eq!(claims.sid, outcome.session.id);
        assert_eq!(claims.role, "user");
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let service = test_service().await;
        let outcome = service.sign_up(signup("user@example.com")).await.unwrap();

        let result = service.refresh(&outcome.access_token).await;
        assert!(matches!(result, Err(AuthError::Authentication)));
    }

    #[tokio::test]
    async fn test_sign_out_revokes_and_invalidates() {
        let service = test_service().await;
        let outcome = service.sign_up(signup("user@example.com")).await.unwrap();

        service
            .sign_out(&outcome.access_token, Some(&outcome.refresh_token))
            .await
            .unwrap();

        assert!(service.tokens.is_revoked(&outcome.access_token).await.unwrap());
        assert!(service.tokens.is_revoked(&outcome.refresh_token).await.unwrap());
        assert!(!service
            .sessions
            .is_valid(&outcome.session.id, outcome.user.id)
            .await
            .unwrap());

        // Refresh with the revoked token now fails
        let result = service.refresh(&outcome.refresh_token).await;
        assert!(matches!(result, Err(AuthError::Authentication)));
    }

    #[tokio::test]
    async fn test_sign_out_twice_is_idempotent() {
        let service = test_service().await;
        let outcome = service.sign_up(signup("user@example.com")).await.unwrap();

        service.sign_out(&outcome.access_token, None).await.unwrap();
        service.sign_out(&outcome.access_token, None).await.unwrap();

        assert!(service.tokens.is_revoked(&outcome.access_token).await.unwrap());
    }

    #[tokio::test]
    async fn test_change_password_requires_current() {
        let service = test_service().await;
        let outcome = service.sign_up(signup("user@example.com")).await.unwrap();

        let result = service
            .change_password(outcome.user.id, "Wrong!pass1", "N3w!secret")
            .await;
        assert!(matches!(result, Err(AuthError::Authentication)));
    }

    #[tokio::test]
    async fn test_change_password_validates_new() {
        let service = test_service().await;
        let outcome = service.sign_up(signup("user@example.com")).await.unwrap();

        let result = service
            .change_password(outcome.user.id, GOOD_PASSWORD, "weakpass")
            .await;
        assert!(matches!(result, Err(AuthError::Validation(_))));
    }

    #[tokio::test]
    async fn test_change_password_end_to_end() {
        let service = test_service().await;
        let outcome = service.sign_up(signup("user@example.com")).await.unwrap();

        service
            .change_password(outcome.user.id, GOOD_PASSWORD, "N3w!secret")
            .await
            .unwrap();

        // Old password no longer works, new one does
        assert!(matches!(
            service.sign_in(signin("user@example.com", GOOD_PASSWORD)).await,
            Err(AuthError::Authentication)
        ));
        assert!(service
            .sign_in(signin("user@example.com", "N3w!secret"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_security_status_reports_attempts() {
        let service = test_service().await;
        let outcome = service.sign_up(signup("user@example.com")).await.unwrap();
        let _ = service.sign_in(signin("user@example.com", "Wrong!pass1")).await;

        let status = service
            .security_status(&outcome.user, &outcome.session.id, "1.2.3.4")
            .await
            .unwrap();

        assert_eq!(status.session_id, outcome.session.id);
        assert!(!status.locked);
        assert_eq!(status.failed_attempts_in_window, 1);
        assert!(!status.recent_attempts.is_empty());
    }

    #[tokio::test]
    async fn test_fraud_block_from_flagged_ip_and_missing_agent() {
        let service = test_service().await;
        service.sign_up(signup("user@example.com")).await.unwrap();

        // Flagged ip (40) + missing agent (20) + rapid retry (25) >= 80
        service.fraud.flag_ip("6.6.6.6");
        let mut first = signin("user@example.com", GOOD_PASSWORD);
        first.ip_address = "6.6.6.6".to_string();
        first.user_agent = None;
        // Prime a prior attempt so the retry-interval signal fires
        let _ = service.sign_in(first.clone()).await;

        let result = service.sign_in(first).await;
        match result {
            Err(AuthError::FraudBlocked { reasons }) => {
                assert!(!reasons.is_empty());
            }
            Ok(_) => {
                // First call may have scored below the block line; the
                // second must not have succeeded silently with these signals
                panic!("expected fraud block");
            }
            Err(other) => panic!("expected fraud block, got {:?}", other),
        }
    }
}
