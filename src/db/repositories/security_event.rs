//! Security event repository
//!
//! Append-only audit trail. The application never updates or deletes rows
//! in this table.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{SecurityEvent, SecurityEventActor, Severity};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// A security event about to be written (no id yet)
#[derive(Debug, Clone)]
pub struct NewSecurityEvent {
    pub event_type: String,
    pub severity: Severity,
    pub description: String,
    pub actor: SecurityEventActor,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Security event repository trait
#[async_trait]
pub trait SecurityEventRepository: Send + Sync {
    /// Append one event, returning its id
    async fn insert(&self, event: &NewSecurityEvent) -> Result<i64>;

    /// Recent events for a user, newest first
    async fn recent_for_user(&self, user_id: i64, limit: u32) -> Result<Vec<SecurityEvent>>;
}

/// SQLx-based security event repository implementation
pub struct SqlxSecurityEventRepository {
    pool: DynDatabasePool,
}

impl SqlxSecurityEventRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SecurityEventRepository> {
        Arc::new(Self::new(pool))
    }
}

const INSERT_SQL: &str = r#"
    INSERT INTO security_events
        (event_type, severity, description, user_id, ip_address, user_agent, metadata, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_SQL: &str = r#"
    SELECT id, event_type, severity, description, user_id, ip_address, user_agent, metadata, created_at
    FROM security_events
    WHERE user_id = ?
    ORDER BY created_at DESC
    LIMIT ?
"#;

#[async_trait]
impl SecurityEventRepository for SqlxSecurityEventRepository {
    async fn insert(&self, event: &NewSecurityEvent) -> Result<i64> {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".to_string());
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                insert_sqlite(self.pool.as_sqlite().unwrap(), event, &metadata).await
            }
            DatabaseDriver::Mysql => {
                insert_mysql(self.pool.as_mysql().unwrap(), event, &metadata).await
            }
        }
    }

    async fn recent_for_user(&self, user_id: i64, limit: u32) -> Result<Vec<SecurityEvent>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(SELECT_SQL)
                    .bind(user_id)
                    .bind(limit)
                    .fetch_all(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to list security events")?;
                rows.iter()
                    .map(|row| {
                        row_to_event(
                            row.get("id"),
                            row.get("event_type"),
                            row.get("severity"),
                            row.get("description"),
                            row.get("user_id"),
                            row.get("ip_address"),
                            row.get("user_agent"),
                            row.get("metadata"),
                            row.get("created_at"),
                        )
                    })
                    .collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(SELECT_SQL)
                    .bind(user_id)
                    .bind(limit)
                    .fetch_all(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to list security events")?;
                rows.iter()
                    .map(|row| {
                        row_to_event(
                            row.get("id"),
                            row.get("event_type"),
                            row.get("severity"),
                            row.get("description"),
                            row.get("user_id"),
                            row.get("ip_address"),
                            row.get("user_agent"),
                            row.get("metadata"),
                            row.get("created_at"),
                        )
                    })
                    .collect()
            }
        }
    }
}

async fn insert_sqlite(
    pool: &SqlitePool,
    event: &NewSecurityEvent,
    metadata: &str,
) -> Result<i64> {
    let result = sqlx::query(INSERT_SQL)
        .bind(&event.event_type)
        .bind(event.severity.to_string())
        .bind(&event.description)
        .bind(event.actor.user_id)
        .bind(&event.actor.ip_address)
        .bind(&event.actor.user_agent)
        .bind(metadata)
        .bind(event.created_at)
        .execute(pool)
        .await
        .context("Failed to insert security event")?;
    Ok(result.last_insert_rowid())
}

async fn insert_mysql(pool: &MySqlPool, event: &NewSecurityEvent, metadata: &str) -> Result<i64> {
    let result = sqlx::query(INSERT_SQL)
        .bind(&event.event_type)
        .bind(event.severity.to_string())
        .bind(&event.description)
        .bind(event.actor.user_id)
        .bind(&event.actor.ip_address)
        .bind(&event.actor.user_agent)
        .bind(metadata)
        .bind(event.created_at)
        .execute(pool)
        .await
        .context("Failed to insert security event")?;
    Ok(result.last_insert_id() as i64)
}

#[allow(clippy::too_many_arguments)]
fn row_to_event(
    id: i64,
    event_type: String,
    severity: String,
    description: String,
    user_id: Option<i64>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    metadata: String,
    created_at: DateTime<Utc>,
) -> Result<SecurityEvent> {
    Ok(SecurityEvent {
        id,
        event_type,
        severity: Severity::from_str(&severity)?,
        description,
        actor: SecurityEventActor {
            user_id,
            ip_address,
            user_agent,
        },
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at,
    })
}
