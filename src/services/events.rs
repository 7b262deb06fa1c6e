//! Security event logger
//!
//! Append-only audit trail of security-relevant actions. Logging never
//! fails the caller: a storage error is reported through `tracing` and
//! swallowed, so authentication availability does not depend on audit-log
//! availability.

use chrono::Utc;
use std::sync::Arc;

use crate::db::repositories::{NewSecurityEvent, SecurityEventRepository};
use crate::models::{SecurityEvent, SecurityEventActor, Severity};

/// Fail-soft writer for the security_events table
pub struct SecurityEventLogger {
    events: Arc<dyn SecurityEventRepository>,
}

impl SecurityEventLogger {
    pub fn new(events: Arc<dyn SecurityEventRepository>) -> Self {
        Self { events }
    }

    /// Append one event. Returns the event id, or None if the write failed
    /// (the failure itself is logged, never propagated).
    pub async fn log(
        &self,
        event_type: &str,
        severity: Severity,
        description: &str,
        actor: SecurityEventActor,
        metadata: serde_json::Value,
    ) -> Option<i64> {
        let event = NewSecurityEvent {
            event_type: event_type.to_string(),
            severity,
            description: description.to_string(),
            actor,
            metadata,
            created_at: Utc::now(),
        };

        match self.events.insert(&event).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(event_type, "failed to write security event: {}", e);
                None
            }
        }
    }

    /// Recent events for a user, newest first
    pub async fn recent_for_user(&self, user_id: i64, limit: u32) -> Vec<SecurityEvent> {
        match self.events.recent_for_user(user_id, limit).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(user_id, "failed to read security events: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxSecurityEventRepository;
    use crate::db::{create_test_pool, migrations};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;

    async fn setup() -> SecurityEventLogger {
        let pool = create_test_pool().await.expect("Failed to create pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SecurityEventLogger::new(SqlxSecurityEventRepository::boxed(pool))
    }

    fn actor(user_id: i64) -> SecurityEventActor {
        SecurityEventActor {
            user_id: Some(user_id),
            ip_address: Some("1.2.3.4".to_string()),
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn test_log_returns_id() {
        let logger = setup().await;
        let id = logger
            .log(
                "login_success",
                Severity::Low,
                "user signed in",
                actor(1),
                json!({}),
            )
            .await;
        assert!(id.is_some());
    }

    #[tokio::test]
    async fn test_recent_for_user_returns_logged_events() {
        let logger = setup().await;
        logger
            .log(
                "account_locked",
                Severity::High,
                "lockout triggered",
                actor(2),
                json!({"failures": 5}),
            )
            .await;

        let events = logger.recent_for_user(2, 10).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "account_locked");
        assert_eq!(events[0].severity, Severity::High);
    }

    /// A repository that always fails, to exercise the fail-soft path
    struct FailingRepo;

    #[async_trait]
    impl SecurityEventRepository for FailingRepo {
        async fn insert(&self, _event: &NewSecurityEvent) -> Result<i64> {
            Err(anyhow::anyhow!("store unreachable"))
        }

        async fn recent_for_user(&self, _user_id: i64, _limit: u32) -> Result<Vec<SecurityEvent>> {
            Err(anyhow::anyhow!("store unreachable"))
        }
    }

    #[tokio::test]
    async fn test_log_failure_is_swallowed() {
        let logger = SecurityEventLogger::new(Arc::new(FailingRepo));

        // Must not panic or propagate
        let id = logger
            .log("login_failed", Severity::Medium, "x", actor(1), json!({}))
            .await;
        assert!(id.is_none());

        let events = logger.recent_for_user(1, 10).await;
        assert!(events.is_empty());
    }
}
