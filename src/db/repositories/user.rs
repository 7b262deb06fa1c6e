//! User repository
//!
//! Database operations for user accounts. The security core needs lookups by
//! email (sign-in) and by id (role re-verification on refresh), account
//! creation, and password updates.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{User, UserRole, UserStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user, returning it with the assigned id
    async fn create(&self, user: &User) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Get user by email (case-insensitive)
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Update a user's password hash
    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()>;
}

/// SQLx-based user repository implementation
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_sqlite(self.pool.as_sqlite().unwrap(), user).await,
            DatabaseDriver::Mysql => create_mysql(self.pool.as_mysql().unwrap(), user).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_by_id_sqlite(self.pool.as_sqlite().unwrap(), id).await,
            DatabaseDriver::Mysql => get_by_id_mysql(self.pool.as_mysql().unwrap(), id).await,
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_by_email_sqlite(self.pool.as_sqlite().unwrap(), email).await
            }
            DatabaseDriver::Mysql => get_by_email_mysql(self.pool.as_mysql().unwrap(), email).await,
        }
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                update_password_sqlite(self.pool.as_sqlite().unwrap(), id, password_hash).await
            }
            DatabaseDriver::Mysql => {
                update_password_mysql(self.pool.as_mysql().unwrap(), id, password_hash).await
            }
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    let result = sqlx::query(
        r#"
        INSERT INTO users (email, password_hash, role, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user.email.to_lowercase())
    .bind(&user.password_hash)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(pool)
    .await
    .context("Failed to create user")?;

    let mut created = user.clone();
    created.id = result.last_insert_rowid();
    created.email = user.email.to_lowercase();
    Ok(created)
}

async fn get_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, email, password_hash, role, status, created_at, updated_at FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get user by ID")?;

    row.map(|r| row_to_user(&RowRef::Sqlite(&r))).transpose()
}

async fn get_by_email_sqlite(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, email, password_hash, role, status, created_at, updated_at FROM users WHERE email = ?",
    )
    .bind(email.to_lowercase())
    .fetch_optional(pool)
    .await
    .context("Failed to get user by email")?;

    row.map(|r| row_to_user(&RowRef::Sqlite(&r))).transpose()
}

async fn update_password_sqlite(pool: &SqlitePool, id: i64, password_hash: &str) -> Result<()> {
    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(password_hash)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update password")?;

    Ok(())
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    let result = sqlx::query(
        r#"
        INSERT INTO users (email, password_hash, role, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user.email.to_lowercase())
    .bind(&user.password_hash)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(pool)
    .await
    .context("Failed to create user")?;

    let mut created = user.clone();
    created.id = result.last_insert_id() as i64;
    created.email = user.email.to_lowercase();
    Ok(created)
}

async fn get_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, email, password_hash, role, status, created_at, updated_at FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get user by ID")?;

    row.map(|r| row_to_user(&RowRef::Mysql(&r))).transpose()
}

async fn get_by_email_mysql(pool: &MySqlPool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, email, password_hash, role, status, created_at, updated_at FROM users WHERE email = ?",
    )
    .bind(email.to_lowercase())
    .fetch_optional(pool)
    .await
    .context("Failed to get user by email")?;

    row.map(|r| row_to_user(&RowRef::Mysql(&r))).transpose()
}

async fn update_password_mysql(pool: &MySqlPool, id: i64, password_hash: &str) -> Result<()> {
    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(password_hash)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update password")?;

    Ok(())
}

// ============================================================================
// Row mapping
// ============================================================================

enum RowRef<'a> {
    Sqlite(&'a sqlx::sqlite::SqliteRow),
    Mysql(&'a sqlx::mysql::MySqlRow),
}

fn row_to_user(row: &RowRef<'_>) -> Result<User> {
    let (id, email, password_hash, role, status, created_at, updated_at): (
        i64,
        String,
        String,
        String,
        String,
        DateTime<Utc>,
        DateTime<Utc>,
    ) = match row {
        RowRef::Sqlite(r) => (
            r.get("id"),
            r.get("email"),
            r.get("password_hash"),
            r.get("role"),
            r.get("status"),
            r.get("created_at"),
            r.get("updated_at"),
        ),
        RowRef::Mysql(r) => (
            r.get("id"),
            r.get("email"),
            r.get("password_hash"),
            r.get("role"),
            r.get("status"),
            r.get("created_at"),
            r.get("updated_at"),
        ),
    };

    Ok(User {
        id,
        email,
        password_hash,
        role: UserRole::from_str(&role)?,
        status: UserStatus::from_str(&status)?,
        created_at,
        updated_at,
    })
}
