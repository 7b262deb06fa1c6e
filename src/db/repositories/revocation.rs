//! Token revocation repository
//!
//! Stores the SHA-256 hex digest of revoked tokens, never the raw token.
//! Inserting an already-revoked hash is a no-op, so revocation is idempotent.
//! Entries are prunable once the underlying token's own expiry passes.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::RevocationEntry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, SqlitePool};
use std::sync::Arc;

/// Revocation repository trait
#[async_trait]
pub trait RevocationRepository: Send + Sync {
    /// Record a revocation. Idempotent for an already-present hash.
    async fn insert(&self, entry: &RevocationEntry) -> Result<()>;

    /// Check whether a token hash is present and unexpired
    async fn is_revoked(&self, token_hash: &str) -> Result<bool>;

    /// Delete entries whose underlying token expired before the cutoff
    async fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based revocation repository implementation
pub struct SqlxRevocationRepository {
    pool: DynDatabasePool,
}

impl SqlxRevocationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn RevocationRepository> {
        Arc::new(Self::new(pool))
    }
}

const INSERT_SQLITE: &str = r#"
    INSERT OR IGNORE INTO revoked_tokens (token_hash, user_id, session_id, reason, expires_at, revoked_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

const INSERT_MYSQL: &str = r#"
    INSERT IGNORE INTO revoked_tokens (token_hash, user_id, session_id, reason, expires_at, revoked_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

#[async_trait]
impl RevocationRepository for SqlxRevocationRepository {
    async fn insert(&self, entry: &RevocationEntry) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                insert_sqlite(self.pool.as_sqlite().unwrap(), entry).await
            }
            DatabaseDriver::Mysql => insert_mysql(self.pool.as_mysql().unwrap(), entry).await,
        }
    }

    async fn is_revoked(&self, token_hash: &str) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM revoked_tokens WHERE token_hash = ?";
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(token_hash)
                .fetch_one(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to check revocation")?,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(token_hash)
                .fetch_one(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to check revocation")?,
        };
        Ok(count > 0)
    }

    async fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let sql = "DELETE FROM revoked_tokens WHERE expires_at < ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(cutoff)
                .execute(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to prune revocations")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(cutoff)
                .execute(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to prune revocations")?
                .rows_affected(),
        };
        Ok(affected)
    }
}

async fn insert_sqlite(pool: &SqlitePool, entry: &RevocationEntry) -> Result<()> {
    sqlx::query(INSERT_SQLITE)
        .bind(&entry.token_hash)
        .bind(entry.user_id)
        .bind(&entry.session_id)
        .bind(&entry.reason)
        .bind(entry.expires_at)
        .bind(entry.revoked_at)
        .execute(pool)
        .await
        .context("Failed to insert revocation")?;
    Ok(())
}

async fn insert_mysql(pool: &MySqlPool, entry: &RevocationEntry) -> Result<()> {
    sqlx::query(INSERT_MYSQL)
        .bind(&entry.token_hash)
        .bind(entry.user_id)
        .bind(&entry.session_id)
        .bind(&entry.reason)
        .bind(entry.expires_at)
        .bind(entry.revoked_at)
        .execute(pool)
        .await
        .context("Failed to insert revocation")?;
    Ok(())
}
