//! Session repository
//!
//! Database operations for authenticated sessions. Rows are never deleted on
//! invalidation (retained for audit); only long-expired rows are pruned.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new session
    async fn create(&self, session: &Session) -> Result<Session>;

    /// Get session by ID
    async fn get_by_id(&self, id: &str) -> Result<Option<Session>>;

    /// Update last_activity and expires_at for an active session.
    /// Returns false if the session was not active.
    async fn touch(&self, id: &str, last_activity: DateTime<Utc>, expires_at: DateTime<Utc>)
        -> Result<bool>;

    /// Mark a session inactive. The row is retained.
    async fn invalidate(&self, id: &str) -> Result<()>;

    /// Mark every active session for a user inactive
    async fn invalidate_by_user(&self, user_id: i64) -> Result<u64>;

    /// Delete rows whose absolute expiry passed before the cutoff
    async fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_sqlite(self.pool.as_sqlite().unwrap(), session).await,
            DatabaseDriver::Mysql => create_mysql(self.pool.as_mysql().unwrap(), session).await,
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_by_id_sqlite(self.pool.as_sqlite().unwrap(), id).await,
            DatabaseDriver::Mysql => get_by_id_mysql(self.pool.as_mysql().unwrap(), id).await,
        }
    }

    async fn touch(
        &self,
        id: &str,
        last_activity: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = "UPDATE sessions SET last_activity = ?, expires_at = ? WHERE id = ? AND active = 1";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(last_activity)
                .bind(expires_at)
                .bind(id)
                .execute(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to touch session")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(last_activity)
                .bind(expires_at)
                .bind(id)
                .execute(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to touch session")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn invalidate(&self, id: &str) -> Result<()> {
        let sql = "UPDATE sessions SET active = 0 WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(id)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to invalidate session")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(id)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to invalidate session")?;
            }
        }
        Ok(())
    }

    async fn invalidate_by_user(&self, user_id: i64) -> Result<u64> {
        let sql = "UPDATE sessions SET active = 0 WHERE user_id = ? AND active = 1";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(user_id)
                .execute(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to invalidate sessions by user")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(user_id)
                .execute(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to invalidate sessions by user")?
                .rows_affected(),
        };
        Ok(affected)
    }

    async fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let sql = "DELETE FROM sessions WHERE absolute_expires_at < ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(cutoff)
                .execute(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to prune sessions")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(cutoff)
                .execute(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to prune sessions")?
                .rows_affected(),
        };
        Ok(affected)
    }
}

// ============================================================================
// Per-driver inserts and lookups
// ============================================================================

const INSERT_SQL: &str = r#"
    INSERT INTO sessions
        (id, user_id, ip_address, user_agent, created_at, last_activity, expires_at, absolute_expires_at, active)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_SQL: &str = r#"
    SELECT id, user_id, ip_address, user_agent, created_at, last_activity,
           expires_at, absolute_expires_at, active
    FROM sessions
    WHERE id = ?
"#;

async fn create_sqlite(pool: &SqlitePool, session: &Session) -> Result<Session> {
    sqlx::query(INSERT_SQL)
        .bind(&session.id)
        .bind(session.user_id)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.created_at)
        .bind(session.last_activity)
        .bind(session.expires_at)
        .bind(session.absolute_expires_at)
        .bind(session.active)
        .execute(pool)
        .await
        .context("Failed to create session")?;

    Ok(session.clone())
}

async fn create_mysql(pool: &MySqlPool, session: &Session) -> Result<Session> {
    sqlx::query(INSERT_SQL)
        .bind(&session.id)
        .bind(session.user_id)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.created_at)
        .bind(session.last_activity)
        .bind(session.expires_at)
        .bind(session.absolute_expires_at)
        .bind(session.active)
        .execute(pool)
        .await
        .context("Failed to create session")?;

    Ok(session.clone())
}

async fn get_by_id_sqlite(pool: &SqlitePool, id: &str) -> Result<Option<Session>> {
    let row = sqlx::query(SELECT_SQL)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get session by ID")?;

    match row {
        Some(row) => Ok(Some(Session {
            id: row.get("id"),
            user_id: row.get("user_id"),
            ip_address: row.get("ip_address"),
            user_agent: row.get("user_agent"),
            created_at: row.get("created_at"),
            last_activity: row.get("last_activity"),
            expires_at: row.get("expires_at"),
            absolute_expires_at: row.get("absolute_expires_at"),
            active: row.get::<i64, _>("active") != 0,
        })),
        None => Ok(None),
    }
}

async fn get_by_id_mysql(pool: &MySqlPool, id: &str) -> Result<Option<Session>> {
    let row = sqlx::query(SELECT_SQL)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get session by ID")?;

    match row {
        Some(row) => Ok(Some(Session {
            id: row.get("id"),
            user_id: row.get("user_id"),
            ip_address: row.get("ip_address"),
            user_agent: row.get("user_agent"),
            created_at: row.get("created_at"),
            last_activity: row.get("last_activity"),
            expires_at: row.get("expires_at"),
            absolute_expires_at: row.get("absolute_expires_at"),
            active: row.get::<i8, _>("active") != 0,
        })),
        None => Ok(None),
    }
}
