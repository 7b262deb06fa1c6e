//! Token claims and revocation entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Claims embedded in an access token.
///
/// The role claim is a convenience for request handling; anything that
/// grants privileges re-reads the role from the users table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject user id
    pub sub: i64,
    /// Email at issue time
    pub email: String,
    /// Role at issue time
    pub role: String,
    /// Session id this token is bound to
    pub sid: String,
    /// Issued-at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Issuer tag
    pub iss: String,
    /// Audience tag (`journeo:access`)
    pub aud: String,
}

/// Claims embedded in a refresh token. Carries identity and session only,
/// no role or email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject user id
    pub sub: i64,
    /// Session id this token is bound to
    pub sid: String,
    /// Issued-at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Issuer tag
    pub iss: String,
    /// Audience tag (`journeo:refresh`)
    pub aud: String,
}

/// A revoked token, keyed by the SHA-256 hex digest of the token string.
/// The raw token is never stored. Entries persist until the token's own
/// natural expiry, after which they are safe to prune.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationEntry {
    /// SHA-256 hex digest of the token string
    pub token_hash: String,
    /// User the token belonged to
    pub user_id: i64,
    /// Session the token was bound to
    pub session_id: String,
    /// Why the token was revoked
    pub reason: String,
    /// The token's own expiry; the entry's natural prune time
    pub expires_at: DateTime<Utc>,
    /// When the revocation was recorded
    pub revoked_at: DateTime<Utc>,
}

impl RevocationEntry {
    /// Check if the underlying token has passed its natural expiry
    pub fn is_prunable(&self) -> bool {
        self.expires_at < Utc::now()
    }
}
