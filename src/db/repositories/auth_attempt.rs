//! Authentication attempt repository
//!
//! Append-only log of sign-in attempts. Rolling failure counts are computed
//! with a single windowed COUNT so concurrent attempts cannot race past the
//! lockout threshold through a stale read.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::AuthAttempt;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

/// Auth attempt repository trait
#[async_trait]
pub trait AuthAttemptRepository: Send + Sync {
    /// Append one attempt row
    async fn record(&self, attempt: &AuthAttempt) -> Result<()>;

    /// Count failed attempts for the (email, ip) pair since the cutoff
    async fn count_failed_since(
        &self,
        email: &str,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<u32>;

    /// Count attempts (any outcome) from an identity since the cutoff
    async fn count_since(&self, email: &str, since: DateTime<Utc>) -> Result<u32>;

    /// Most recent attempt timestamp for an identity, if any
    async fn last_attempt_at(&self, email: &str) -> Result<Option<DateTime<Utc>>>;

    /// Most recent successful attempt for the (email, ip) pair, if any
    async fn last_success_at(
        &self,
        email: &str,
        ip_address: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Recent attempts for an identity, newest first
    async fn recent_for_email(&self, email: &str, limit: u32) -> Result<Vec<AuthAttempt>>;
}

/// SQLx-based auth attempt repository implementation
pub struct SqlxAuthAttemptRepository {
    pool: DynDatabasePool,
}

impl SqlxAuthAttemptRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AuthAttemptRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl AuthAttemptRepository for SqlxAuthAttemptRepository {
    async fn record(&self, attempt: &AuthAttempt) -> Result<()> {
        let sql = r#"
            INSERT INTO auth_attempts (email, ip_address, success, failure_reason, user_agent, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
        "#;
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(attempt.email.to_lowercase())
                    .bind(&attempt.ip_address)
                    .bind(attempt.success)
                    .bind(&attempt.failure_reason)
                    .bind(&attempt.user_agent)
                    .bind(attempt.created_at)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to record auth attempt")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(attempt.email.to_lowercase())
                    .bind(&attempt.ip_address)
                    .bind(attempt.success)
                    .bind(&attempt.failure_reason)
                    .bind(&attempt.user_agent)
                    .bind(attempt.created_at)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to record auth attempt")?;
            }
        }
        Ok(())
    }

    async fn count_failed_since(
        &self,
        email: &str,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<u32> {
        let sql = r#"
            SELECT COUNT(*) FROM auth_attempts
            WHERE email = ? AND ip_address = ? AND success = 0 AND created_at > ?
        "#;
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(email.to_lowercase())
                .bind(ip_address)
                .bind(since)
                .fetch_one(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to count failed attempts")?,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(email.to_lowercase())
                .bind(ip_address)
                .bind(since)
                .fetch_one(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to count failed attempts")?,
        };
        Ok(count as u32)
    }

    async fn count_since(&self, email: &str, since: DateTime<Utc>) -> Result<u32> {
        let sql = "SELECT COUNT(*) FROM auth_attempts WHERE email = ? AND created_at > ?";
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(email.to_lowercase())
                .bind(since)
                .fetch_one(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to count attempts")?,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(email.to_lowercase())
                .bind(since)
                .fetch_one(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to count attempts")?,
        };
        Ok(count as u32)
    }

    async fn last_attempt_at(&self, email: &str) -> Result<Option<DateTime<Utc>>> {
        let sql = "SELECT MAX(created_at) FROM auth_attempts WHERE email = ?";
        let at: Option<DateTime<Utc>> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(email.to_lowercase())
                .fetch_one(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to get last attempt")?,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(email.to_lowercase())
                .fetch_one(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to get last attempt")?,
        };
        Ok(at)
    }

    async fn last_success_at(
        &self,
        email: &str,
        ip_address: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let sql = "SELECT MAX(created_at) FROM auth_attempts WHERE email = ? AND ip_address = ? AND success = 1";
        let at: Option<DateTime<Utc>> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(email.to_lowercase())
                .bind(ip_address)
                .fetch_one(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to get last success")?,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(email.to_lowercase())
                .bind(ip_address)
                .fetch_one(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to get last success")?,
        };
        Ok(at)
    }

    async fn recent_for_email(&self, email: &str, limit: u32) -> Result<Vec<AuthAttempt>> {
        let sql = r#"
            SELECT id, email, ip_address, success, failure_reason, user_agent, created_at
            FROM auth_attempts
            WHERE email = ?
            ORDER BY created_at DESC
            LIMIT ?
        "#;
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(sql)
                    .bind(email.to_lowercase())
                    .bind(limit)
                    .fetch_all(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to list attempts")?;
                Ok(rows
                    .iter()
                    .map(|row| AuthAttempt {
                        id: row.get("id"),
                        email: row.get("email"),
                        ip_address: row.get("ip_address"),
                        success: row.get::<i64, _>("success") != 0,
                        failure_reason: row.get("failure_reason"),
                        user_agent: row.get("user_agent"),
                        created_at: row.get("created_at"),
                    })
                    .collect())
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(sql)
                    .bind(email.to_lowercase())
                    .bind(limit)
                    .fetch_all(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to list attempts")?;
                Ok(rows
                    .iter()
                    .map(|row| AuthAttempt {
                        id: row.get("id"),
                        email: row.get("email"),
                        ip_address: row.get("ip_address"),
                        success: row.get::<i8, _>("success") != 0,
                        failure_reason: row.get("failure_reason"),
                        user_agent: row.get("user_agent"),
                        created_at: row.get("created_at"),
                    })
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::Duration;

    async fn setup() -> SqlxAuthAttemptRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxAuthAttemptRepository::new(pool)
    }

    fn attempt(email: &str, ip: &str, success: bool) -> AuthAttempt {
        AuthAttempt {
            id: 0,
            email: email.to_string(),
            ip_address: ip.to_string(),
            success,
            failure_reason: (!success).then(|| "bad credential".to_string()),
            user_agent: Some("test-agent".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_record_and_count_failures() {
        let repo = setup().await;

        for _ in 0..3 {
            repo.record(&attempt("user@example.com", "1.2.3.4", false))
                .await
                .unwrap();
        }
        repo.record(&attempt("user@example.com", "1.2.3.4", true))
            .await
            .unwrap();

        let since = Utc::now() - Duration::minutes(15);
        let failed = repo
            .count_failed_since("user@example.com", "1.2.3.4", since)
            .await
            .unwrap();
        assert_eq!(failed, 3);
    }

    #[tokio::test]
    async fn test_count_scoped_to_pair() {
        let repo = setup().await;
        repo.record(&attempt("user@example.com", "1.2.3.4", false))
            .await
            .unwrap();
        repo.record(&attempt("user@example.com", "5.6.7.8", false))
            .await
            .unwrap();
        repo.record(&attempt("other@example.com", "1.2.3.4", false))
            .await
            .unwrap();

        let since = Utc::now() - Duration::minutes(15);
        let failed = repo
            .count_failed_since("user@example.com", "1.2.3.4", since)
            .await
            .unwrap();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_count_window_excludes_old_attempts() {
        let repo = setup().await;
        let mut old = attempt("user@example.com", "1.2.3.4", false);
        old.created_at = Utc::now() - Duration::minutes(30);
        repo.record(&old).await.unwrap();
        repo.record(&attempt("user@example.com", "1.2.3.4", false))
            .await
            .unwrap();

        let since = Utc::now() - Duration::minutes(15);
        let failed = repo
            .count_failed_since("user@example.com", "1.2.3.4", since)
            .await
            .unwrap();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_email_case_insensitive() {
        let repo = setup().await;
        repo.record(&attempt("User@Example.com", "1.2.3.4", false))
            .await
            .unwrap();

        let since = Utc::now() - Duration::minutes(15);
        let failed = repo
            .count_failed_since("user@example.com", "1.2.3.4", since)
            .await
            .unwrap();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_last_attempt_at() {
        let repo = setup().await;
        assert!(repo
            .last_attempt_at("user@example.com")
            .await
            .unwrap()
            .is_none());

        repo.record(&attempt("user@example.com", "1.2.3.4", false))
            .await
            .unwrap();
        assert!(repo
            .last_attempt_at("user@example.com")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_last_success_at_scoped_to_pair() {
        let repo = setup().await;
        repo.record(&attempt("user@example.com", "1.2.3.4", false))
            .await
            .unwrap();
        assert!(repo
            .last_success_at("user@example.com", "1.2.3.4")
            .await
            .unwrap()
            .is_none());

        repo.record(&attempt("user@example.com", "5.6.7.8", true))
            .await
            .unwrap();
        // Success on another ip doesn't count for this pair
        assert!(repo
            .last_success_at("user@example.com", "1.2.3.4")
            .await
            .unwrap()
            .is_none());

        repo.record(&attempt("user@example.com", "1.2.3.4", true))
            .await
            .unwrap();
        assert!(repo
            .last_success_at("user@example.com", "1.2.3.4")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_recent_for_email_ordered() {
        let repo = setup().await;
        let mut first = attempt("user@example.com", "1.2.3.4", false);
        first.created_at = Utc::now() - Duration::minutes(5);
        repo.record(&first).await.unwrap();
        repo.record(&attempt("user@example.com", "1.2.3.4", true))
            .await
            .unwrap();

        let recent = repo.recent_for_email("user@example.com", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].success);
        assert!(!recent[1].success);
    }
}
