//! Data models
//!
//! This module defines the entities used by the Journeo account-security core.

pub mod security;
pub mod session;
pub mod token;
pub mod user;

pub use security::{
    AccountLockout, AuthAttempt, SecurityEvent, SecurityEventActor, Severity,
};
pub use session::Session;
pub use token::{AccessClaims, RefreshClaims, RevocationEntry};
pub use user::{User, UserRole, UserStatus};
