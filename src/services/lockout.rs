//! Account lockout tracker
//!
//! Counts failed authentication attempts per (email, ip) pair within a
//! rolling window and locks the pair once the threshold is crossed. The
//! count is derived from the append-only attempt log with a windowed COUNT,
//! so concurrent failures serialize at the store instead of racing a
//! read-modify-write counter in application code.
//!
//! State machine per pair:
//! Unlocked -> (failures >= threshold within window) -> Locked(until now +
//! cooldown) -> (cooldown elapses OR explicit clear OR next successful auth)
//! -> Unlocked.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::config::LockoutConfig;
use crate::db::repositories::{AuthAttemptRepository, LockoutRepository};
use crate::models::{AccountLockout, AuthAttempt};

/// Tracks authentication attempts and drives the lockout state machine
pub struct LockoutTracker {
    attempts: Arc<dyn AuthAttemptRepository>,
    lockouts: Arc<dyn LockoutRepository>,
    config: LockoutConfig,
}

impl LockoutTracker {
    pub fn new(
        attempts: Arc<dyn AuthAttemptRepository>,
        lockouts: Arc<dyn LockoutRepository>,
        config: LockoutConfig,
    ) -> Self {
        Self {
            attempts,
            lockouts,
            config,
        }
    }

    /// Append an attempt row. On failure, re-count the window and trigger a
    /// lock when the threshold is reached; returns the lock if this attempt
    /// created or refreshed one.
    pub async fn record_attempt(
        &self,
        email: &str,
        ip_address: &str,
        success: bool,
        failure_reason: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<Option<AccountLockout>> {
        let attempt = AuthAttempt {
            id: 0,
            email: email.to_string(),
            ip_address: ip_address.to_string(),
            success,
            failure_reason: failure_reason.map(String::from),
            user_agent: user_agent.map(String::from),
            created_at: Utc::now(),
        };
        self.attempts.record(&attempt).await?;

        if success {
            // Successful authentication resets the pair
            self.clear(email, ip_address).await?;
            return Ok(None);
        }

        let failed = self
            .failed_count_in_window(email, ip_address)
            .await?;

        if failed >= self.config.threshold {
            let lockout = AccountLockout {
                email: email.to_lowercase(),
                ip_address: ip_address.to_string(),
                locked_until: Utc::now() + Duration::minutes(self.config.cooldown_minutes),
                trigger_count: failed,
                created_at: Utc::now(),
            };
            self.lockouts.upsert(&lockout).await?;
            return Ok(Some(lockout));
        }

        Ok(None)
    }

    /// True if a non-expired lockout exists for the pair (or an email-wide
    /// lock)
    pub async fn is_locked(&self, email: &str, ip_address: &str) -> Result<bool> {
        Ok(self.lockouts.find_active(email, ip_address).await?.is_some())
    }

    /// The active lock's expiry, if any
    pub async fn locked_until(
        &self,
        email: &str,
        ip_address: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .lockouts
            .find_active(email, ip_address)
            .await?
            .map(|l| l.locked_until))
    }

    /// Failed attempts for the pair in the trailing configured window.
    ///
    /// Failures before the pair's last successful authentication do not
    /// count: success resets the counter, not just the lock.
    pub async fn failed_count_in_window(&self, email: &str, ip_address: &str) -> Result<u32> {
        let window_start = Utc::now() - Duration::minutes(self.config.window_minutes);
        let since = match self.attempts.last_success_at(email, ip_address).await? {
            Some(success_at) => window_start.max(success_at),
            None => window_start,
        };
        self.attempts
            .count_failed_since(email, ip_address, since)
            .await
    }

    /// Explicit reset: removes the pair's lock and any email-wide lock.
    /// Also invoked automatically on the next successful authentication.
    pub async fn clear(&self, email: &str, ip_address: &str) -> Result<()> {
        self.lockouts.clear(email, ip_address).await
    }

    /// Delete locks whose cooldown passed before the cutoff
    pub async fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.lockouts.prune_expired(cutoff).await
    }
}
