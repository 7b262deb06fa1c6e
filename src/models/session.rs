//! Session model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One authenticated device/browser instance.
///
/// `expires_at` slides forward on activity but never past
/// `absolute_expires_at`, which is fixed at creation. Deactivated sessions
/// are retained for audit and never transition back to active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session ID (matches the `sid` token claim)
    pub id: String,
    /// Associated user ID
    pub user_id: i64,
    /// Client IP at creation
    pub ip_address: Option<String>,
    /// Client user agent at creation
    pub user_agent: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last authenticated activity
    pub last_activity: DateTime<Utc>,
    /// Sliding idle expiry
    pub expires_at: DateTime<Utc>,
    /// Hard ceiling, fixed at creation
    pub absolute_expires_at: DateTime<Utc>,
    /// Active flag; false is terminal
    pub active: bool,
}

impl Session {
    /// Check if the session has passed its idle expiry
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// Check if the session is active and within both expiry bounds
    pub fn is_valid(&self) -> bool {
        let now = Utc::now();
        self.active && self.expires_at >= now && self.absolute_expires_at >= now
    }

    /// Compute the next idle expiry, capped at the absolute ceiling
    pub fn next_expiry(&self, idle_minutes: i64) -> DateTime<Utc> {
        let candidate = Utc::now() + Duration::minutes(idle_minutes);
        candidate.min(self.absolute_expires_at)
    }
}
