//! Account lockout repository
//!
//! Lockout state keyed by the (email, ip) pair. Recording and checking go
//! through the same methods so the two paths cannot diverge on key shape.
//! An empty ip denotes an email-wide lock.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::AccountLockout;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

/// Lockout repository trait
#[async_trait]
pub trait LockoutRepository: Send + Sync {
    /// Insert or refresh a lockout for the (email, ip) pair
    async fn upsert(&self, lockout: &AccountLockout) -> Result<()>;

    /// Find an unexpired lockout matching the exact pair or an email-wide
    /// lock (empty ip)
    async fn find_active(&self, email: &str, ip_address: &str) -> Result<Option<AccountLockout>>;

    /// Remove lockouts for the pair and any email-wide lock
    async fn clear(&self, email: &str, ip_address: &str) -> Result<()>;

    /// Delete lockouts whose cooldown has long passed
    async fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based lockout repository implementation
pub struct SqlxLockoutRepository {
    pool: DynDatabasePool,
}

impl SqlxLockoutRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn LockoutRepository> {
        Arc::new(Self::new(pool))
    }
}

const UPSERT_SQLITE: &str = r#"
    INSERT INTO account_lockouts (email, ip_address, locked_until, trigger_count, created_at)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT (email, ip_address)
    DO UPDATE SET locked_until = excluded.locked_until, trigger_count = excluded.trigger_count
"#;

const UPSERT_MYSQL: &str = r#"
    INSERT INTO account_lockouts (email, ip_address, locked_until, trigger_count, created_at)
    VALUES (?, ?, ?, ?, ?)
    ON DUPLICATE KEY UPDATE locked_until = VALUES(locked_until), trigger_count = VALUES(trigger_count)
"#;

const FIND_SQL: &str = r#"
    SELECT email, ip_address, locked_until, trigger_count, created_at
    FROM account_lockouts
    WHERE email = ? AND (ip_address = ? OR ip_address = '') AND locked_until > ?
    ORDER BY locked_until DESC
    LIMIT 1
"#;

#[async_trait]
impl LockoutRepository for SqlxLockoutRepository {
    async fn upsert(&self, lockout: &AccountLockout) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(UPSERT_SQLITE)
                    .bind(lockout.email.to_lowercase())
                    .bind(&lockout.ip_address)
                    .bind(lockout.locked_until)
                    .bind(lockout.trigger_count)
                    .bind(lockout.created_at)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to upsert lockout")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(UPSERT_MYSQL)
                    .bind(lockout.email.to_lowercase())
                    .bind(&lockout.ip_address)
                    .bind(lockout.locked_until)
                    .bind(lockout.trigger_count)
                    .bind(lockout.created_at)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to upsert lockout")?;
            }
        }
        Ok(())
    }

    async fn find_active(&self, email: &str, ip_address: &str) -> Result<Option<AccountLockout>> {
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(FIND_SQL)
                    .bind(email.to_lowercase())
                    .bind(ip_address)
                    .bind(now)
                    .fetch_optional(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to find lockout")?;
                Ok(row.map(|row| row_to_lockout_sqlite(&row)))
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(FIND_SQL)
                    .bind(email.to_lowercase())
                    .bind(ip_address)
                    .bind(now)
                    .fetch_optional(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to find lockout")?;
                Ok(row.map(|row| row_to_lockout_mysql(&row)))
            }
        }
    }

    async fn clear(&self, email: &str, ip_address: &str) -> Result<()> {
        let sql = "DELETE FROM account_lockouts WHERE email = ? AND (ip_address = ? OR ip_address = '')";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(email.to_lowercase())
                    .bind(ip_address)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to clear lockout")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(email.to_lowercase())
                    .bind(ip_address)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to clear lockout")?;
            }
        }
        Ok(())
    }

    async fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let sql = "DELETE FROM account_lockouts WHERE locked_until < ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(cutoff)
                .execute(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to prune lockouts")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(cutoff)
                .execute(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to prune lockouts")?
                .rows_affected(),
        };
        Ok(affected)
    }
}

fn row_to_lockout_sqlite(row: &sqlx::sqlite::SqliteRow) -> AccountLockout {
    AccountLockout {
        email: row.get("email"),
        ip_address: row.get("ip_address"),
        locked_until: row.get("locked_until"),
        trigger_count: row.get::<i64, _>("trigger_count") as u32,
        created_at: row.get("created_at"),
    }
}

fn row_to_lockout_mysql(row: &sqlx::mysql::MySqlRow) -> AccountLockout {
    AccountLockout {
        email: row.get("email"),
        ip_address: row.get("ip_address"),
        locked_until: row.get("locked_until"),
        trigger_count: row.get::<i32, _>("trigger_count") as u32,
        created_at: row.get("created_at"),
    }
}
