//! Security bookkeeping models
//!
//! Append-only records (auth attempts, security events) and the lockout
//! state read on every sign-in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One authentication attempt, successful or not. Append-only; rolling
/// failure counts are computed over these rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthAttempt {
    pub id: i64,
    pub email: String,
    pub ip_address: String,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lockout state for an (email, ip) pair. An empty `ip_address` denotes an
/// email-wide lock (explicit administrative action).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountLockout {
    pub email: String,
    pub ip_address: String,
    pub locked_until: DateTime<Utc>,
    pub trigger_count: u32,
    pub created_at: DateTime<Utc>,
}

impl AccountLockout {
    /// Check if the lock is still in force
    pub fn is_active(&self) -> bool {
        self.locked_until > Utc::now()
    }
}

/// Severity of a security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(anyhow::anyhow!("Invalid severity: {}", s)),
        }
    }
}

/// Who performed the action a security event records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityEventActor {
    pub user_id: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Append-only audit record of a security-relevant action. Never deleted
/// by the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: i64,
    pub event_type: String,
    pub severity: Severity,
    pub description: String,
    pub actor: SecurityEventActor,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
