//! Journeo - Travel booking platform backend

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use journeo::{
    api::{self, AppState},
    config::Config,
    db::{
        self,
        repositories::{
            SqlxAuthAttemptRepository, SqlxLockoutRepository, SqlxRevocationRepository,
            SqlxSecurityEventRepository, SqlxSessionRepository, SqlxUserRepository,
        },
    },
    services::{
        auth::AuthService, events::SecurityEventLogger, fraud::FraudScorer,
        lockout::LockoutTracker, rate_limiter::RateLimiter, session::SessionManager,
        token::TokenService, EmailService,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "journeo=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Journeo backend...");

    // Load configuration; refuse to boot with weak signing secrets
    let config = Config::load_with_env(Path::new("config.yml"))?;
    config.validate()?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Create repositories
    let users = SqlxUserRepository::boxed(pool.clone());
    let attempts = SqlxAuthAttemptRepository::boxed(pool.clone());
    let lockouts = SqlxLockoutRepository::boxed(pool.clone());
    let sessions_repo = SqlxSessionRepository::boxed(pool.clone());
    let revocations = SqlxRevocationRepository::boxed(pool.clone());
    let events_repo = SqlxSecurityEventRepository::boxed(pool.clone());

    // Initialize services
    let lockout = Arc::new(LockoutTracker::new(
        attempts.clone(),
        lockouts,
        config.lockout.clone(),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let fraud = Arc::new(FraudScorer::new(config.fraud.clone()));
    let sessions = Arc::new(SessionManager::new(sessions_repo, config.session.clone()));
    let tokens = Arc::new(TokenService::new(&config.auth, revocations));
    let events = Arc::new(SecurityEventLogger::new(events_repo));
    let email = Arc::new(EmailService::new(config.smtp.clone()));

    let auth_service = Arc::new(
        AuthService::new(
            users.clone(),
            attempts,
            lockout.clone(),
            rate_limiter.clone(),
            fraud,
            sessions.clone(),
            tokens.clone(),
            events,
            email,
            config.lockout.cooldown_minutes,
        )
        .with_breach_check(),
    );
    tracing::info!("Security services initialized");

    // Build application state
    let state = AppState {
        auth_service,
        users,
        tokens: tokens.clone(),
        sessions: sessions.clone(),
        rate_limiter: rate_limiter.clone(),
    };

    // Periodic maintenance: prune expired revocations, sessions, and stale
    // rate-limit windows (runs every 5 minutes)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            let now = chrono::Utc::now();
            if let Err(e) = tokens.prune_expired(now).await {
                tracing::warn!("revocation prune failed: {}", e);
            }
            if let Err(e) = sessions.prune_expired(now).await {
                tracing::warn!("session prune failed: {}", e);
            }
            if let Err(e) = lockout.prune_expired(now).await {
                tracing::warn!("lockout prune failed: {}", e);
            }
            rate_limiter.cleanup().await;
        }
    });

    // Build router
    let app = api::build_router(state, &config.server.cors_origin);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
