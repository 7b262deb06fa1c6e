//! Token service
//!
//! Issues and verifies the two bearer credentials:
//! - Access tokens: short-lived, carry identity, role, and session id
//! - Refresh tokens: longer-lived, carry identity and session id only
//!
//! The two kinds are signed with distinct secrets and tagged with distinct
//! audiences, so a refresh token can never be replayed as an access token or
//! vice versa. Revocation is tracked by the SHA-256 digest of the token
//! string; the raw token never reaches the store.

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::db::repositories::RevocationRepository;
use crate::models::{AccessClaims, RefreshClaims, RevocationEntry};

const ACCESS_AUDIENCE: &str = "journeo:access";
const REFRESH_AUDIENCE: &str = "journeo:refresh";

/// Error types for token operations
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Malformed, wrongly signed, wrong audience, or expired. Callers must
    /// answer this exactly like a missing token.
    #[error("Invalid token")]
    Invalid,

    /// Well-formed and verifiable, but revoked
    #[error("Token revoked")]
    Revoked,

    /// Store failure while checking or recording revocation
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Token service issuing and verifying access/refresh pairs
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    revocations: Arc<dyn RevocationRepository>,
}

impl TokenService {
    pub fn new(config: &AuthConfig, revocations: Arc<dyn RevocationRepository>) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_ttl: Duration::minutes(config.access_ttl_minutes),
            refresh_ttl: Duration::days(config.refresh_ttl_days),
            revocations,
        }
    }

    /// Access token lifetime
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Issue a signed access token bound to a session
    pub fn issue_access_token(
        &self,
        user_id: i64,
        email: &str,
        role: &str,
        session_id: &str,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user_id,
            email: email.to_string(),
            role: role.to_string(),
            sid: session_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            iss: self.issuer.clone(),
            aud: ACCESS_AUDIENCE.to_string(),
        };
        encode(&Header::default(), &claims, &self.access_encoding)
            .map_err(|_| TokenError::Invalid)
    }

    /// Issue a signed refresh token bound to a session
    pub fn issue_refresh_token(
        &self,
        user_id: i64,
        session_id: &str,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: user_id,
            sid: session_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
            iss: self.issuer.clone(),
            aud: REFRESH_AUDIENCE.to_string(),
        };
        encode(&Header::default(), &claims, &self.refresh_encoding)
            .map_err(|_| TokenError::Invalid)
    }

    /// Verify an access token: signature, issuer, audience, expiry.
    ///
    /// Does not consult the revocation store; callers needing that guarantee
    /// pair this with [`TokenService::is_revoked`].
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let validation = self.validation(ACCESS_AUDIENCE, true);
        decode::<AccessClaims>(token, &self.access_decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| TokenError::Invalid)
    }

    /// Verify a refresh token: signature, issuer, audience, expiry
    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let validation = self.validation(REFRESH_AUDIENCE, true);
        decode::<RefreshClaims>(token, &self.refresh_decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| TokenError::Invalid)
    }

    /// Check whether a token has been revoked, by hash
    pub async fn is_revoked(&self, token: &str) -> Result<bool, TokenError> {
        Ok(self.revocations.is_revoked(&token_hash(token)).await?)
    }

    /// Revoke a token.
    ///
    /// Claims are decoded without expiry validation; a token near or past
    /// expiry can still be revoked. The entry inherits the token's own
    /// expiry as its natural prune time. Idempotent.
    pub async fn revoke(&self, token: &str, reason: &str) -> Result<(), TokenError> {
        let (user_id, session_id, expires_at) = self.decode_for_revocation(token)?;

        let entry = RevocationEntry {
            token_hash: token_hash(token),
            user_id,
            session_id,
            reason: reason.to_string(),
            expires_at,
            revoked_at: Utc::now(),
        };
        self.revocations.insert(&entry).await?;
        Ok(())
    }

    /// Delete revocation entries for tokens that expired before the cutoff
    pub async fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.revocations.prune_expired(cutoff).await
    }

    /// Decode either token kind with expiry validation disabled. Signature,
    /// issuer, and audience are still enforced.
    fn decode_for_revocation(
        &self,
        token: &str,
    ) -> Result<(i64, String, DateTime<Utc>), TokenError> {
        let access_validation = self.validation(ACCESS_AUDIENCE, false);
        if let Ok(data) = decode::<AccessClaims>(token, &self.access_decoding, &access_validation) {
            let expires_at = timestamp_to_datetime(data.claims.exp)?;
            return Ok((data.claims.sub, data.claims.sid, expires_at));
        }

        let refresh_validation = self.validation(REFRESH_AUDIENCE, false);
        let data = decode::<RefreshClaims>(token, &self.refresh_decoding, &refresh_validation)
            .map_err(|_| TokenError::Invalid)?;
        let expires_at = timestamp_to_datetime(data.claims.exp)?;
        Ok((data.claims.sub, data.claims.sid, expires_at))
    }

    fn validation(&self, audience: &str, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[audience]);
        validation.validate_exp = validate_exp;
        validation.leeway = 0;
        validation
    }
}

/// SHA-256 hex digest of a token string
fn token_hash(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

fn timestamp_to_datetime(ts: i64) -> Result<DateTime<Utc>, TokenError> {
    Utc.timestamp_opt(ts, 0).single().ok_or(TokenError::Invalid)
}
