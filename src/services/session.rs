//! Session manager
//!
//! Creates, extends, and invalidates session records. Idle expiry slides
//! forward on each authenticated request; the absolute ceiling fixed at
//! creation is never exceeded. Invalidation is terminal and retains the row
//! for audit.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::db::repositories::SessionRepository;
use crate::models::Session;

/// Session manager service
pub struct SessionManager {
    sessions: Arc<dyn SessionRepository>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(sessions: Arc<dyn SessionRepository>, config: SessionConfig) -> Self {
        Self { sessions, config }
    }

    /// Create an active session with idle expiry `now + idle_minutes` and a
    /// hard ceiling `now + absolute_hours`
    pub async fn create_session(
        &self,
        user_id: i64,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id,
            ip_address: ip_address.map(String::from),
            user_agent: user_agent.map(String::from),
            created_at: now,
            last_activity: now,
            expires_at: now + Duration::minutes(self.config.idle_minutes),
            absolute_expires_at: now + Duration::hours(self.config.absolute_hours),
            active: true,
        };
        self.sessions.create(&session).await
    }

    /// Extend an active session's idle expiry and update last activity.
    ///
    /// Returns false (no-op) if the session is inactive or unknown; callers
    /// treat that as expired. The extension never passes the absolute
    /// ceiling.
    pub async fn touch(&self, session_id: &str) -> Result<bool> {
        let session = match self.sessions.get_by_id(session_id).await? {
            Some(s) if s.active => s,
            _ => return Ok(false),
        };

        let next_expiry = session.next_expiry(self.config.idle_minutes);
        self.sessions.touch(session_id, Utc::now(), next_expiry).await
    }

    /// Mark a session inactive. Terminal; the row is retained for audit.
    pub async fn invalidate(&self, session_id: &str, reason: &str) -> Result<()> {
        tracing::debug!(session_id, reason, "invalidating session");
        self.sessions.invalidate(session_id).await
    }

    /// Mark every active session of a user inactive
    pub async fn invalidate_all_for_user(&self, user_id: i64, reason: &str) -> Result<u64> {
        tracing::debug!(user_id, reason, "invalidating all sessions for user");
        self.sessions.invalidate_by_user(user_id).await
    }

    /// True if the session exists, belongs to the user, is active, and is
    /// within both expiry bounds
    pub async fn is_valid(&self, session_id: &str, user_id: i64) -> Result<bool> {
        Ok(self
            .sessions
            .get_by_id(session_id)
            .await?
            .map(|s| s.user_id == user_id && s.is_valid())
            .unwrap_or(false))
    }

    /// Fetch a session by id
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        self.sessions.get_by_id(session_id).await
    }

    /// Delete rows whose absolute expiry passed before the cutoff
    pub async fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.sessions.prune_expired(cutoff).await
    }
}
